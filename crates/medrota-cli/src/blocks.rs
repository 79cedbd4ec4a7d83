//! Academic block calendar math.
//!
//! The academic year starts July 1 and is divided into thirteen 28-day
//! blocks; the last block absorbs the remainder up to June 30.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use medrota_core::domain::DateRange;

pub const BLOCKS_PER_YEAR: u32 = 13;
pub const BLOCK_DAYS: i64 = 28;

/// Date range of one academic block. `year` is the calendar year the
/// academic year starts in.
pub fn block_dates(block: u32, year: i32) -> Result<DateRange> {
    if block == 0 || block > BLOCKS_PER_YEAR {
        bail!("block must be between 1 and {}, got {}", BLOCKS_PER_YEAR, block);
    }
    let year_start = NaiveDate::from_ymd_opt(year, 7, 1)
        .ok_or_else(|| anyhow::anyhow!("invalid academic year {}", year))?;
    let year_end = NaiveDate::from_ymd_opt(year + 1, 6, 30)
        .ok_or_else(|| anyhow::anyhow!("invalid academic year {}", year))?;

    let start = year_start + chrono::Duration::days((block as i64 - 1) * BLOCK_DAYS);
    let end = if block == BLOCKS_PER_YEAR {
        year_end
    } else {
        start + chrono::Duration::days(BLOCK_DAYS - 1)
    };
    Ok(DateRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_block_starts_july_first() {
        let range = block_dates(1, 2026).unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2026, 7, 1).unwrap());
        assert_eq!(range.num_days(), 28);
    }

    #[test]
    fn test_blocks_are_contiguous() {
        let b1 = block_dates(1, 2026).unwrap();
        let b2 = block_dates(2, 2026).unwrap();
        assert_eq!(b2.start, b1.end.succ_opt().unwrap());
    }

    #[test]
    fn test_last_block_ends_june_thirtieth() {
        let range = block_dates(13, 2026).unwrap();
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2027, 6, 30).unwrap());
        assert!(range.num_days() >= 28);
    }

    #[test]
    fn test_out_of_range_blocks_rejected() {
        assert!(block_dates(0, 2026).is_err());
        assert!(block_dates(14, 2026).is_err());
    }
}
