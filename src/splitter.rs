use crate::errors::{AppError, Result};
use crate::intervals::{Interval, IntervalSet};

/// Divides an interval set into two parts of roughly equal extent.
pub trait IntervalSplitter: Send + Sync {
    fn split(&self, set: &IntervalSet) -> Result<(IntervalSet, IntervalSet)>;
}

/// Deterministic bisection by accumulated extent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bisector;

impl IntervalSplitter for Bisector {
    fn split(&self, set: &IntervalSet) -> Result<(IntervalSet, IntervalSet)> {
        let impossible = || AppError::ImpossibleSplit {
            intervals: set.interval_count(),
            extent: set.extent(),
        };

        let mut first_half = IntervalSet::new();
        let mut second_half = IntervalSet::new();

        match set.interval_count() {
            0 => return Err(impossible()),
            1 => {
                let (contig, interval) = set.iter().next().ok_or_else(impossible)?;
                if interval.size() < 2 {
                    return Err(impossible());
                }
                let midpoint = interval.first() + (interval.last() - interval.first()) / 2;
                first_half.add_interval(contig, Interval::new(interval.first(), midpoint)?);
                second_half.add_interval(contig, Interval::new(midpoint + 1, interval.last())?);
            }
            2 => {
                let mut intervals = set.iter();
                if let Some((contig, interval)) = intervals.next() {
                    first_half.add_interval(contig, interval);
                }
                if let Some((contig, interval)) = intervals.next() {
                    second_half.add_interval(contig, interval);
                }
            }
            _ => {
                let half = set.extent() / 2;
                let mut accumulated = 0_u64;
                for (contig, interval) in set.iter() {
                    if accumulated > half {
                        second_half.add_interval(contig, interval);
                    } else {
                        first_half.add_interval(contig, interval);
                        accumulated += interval.size();
                    }
                }
                if second_half.is_empty()
                    && let Some((contig, biggest)) = first_half.biggest_interval()
                {
                    first_half.remove_interval(&contig, &biggest);
                    second_half.add_interval(&contig, biggest);
                }
            }
        }

        if first_half.extent() == 0 || second_half.extent() == 0 {
            return Err(impossible());
        }
        Ok((first_half, second_half))
    }
}

#[cfg(test)]
mod tests {
    use super::{Bisector, IntervalSplitter};
    use crate::errors::AppError;
    use crate::intervals::{Interval, IntervalSet};

    fn set(regions: &str) -> IntervalSet {
        IntervalSet::parse_region_str(regions).expect("expected regions")
    }

    #[test]
    fn bisects_single_interval_without_overlap() {
        let (first, second) = Bisector.split(&set("1:1-1000000")).expect("expected split");
        assert_eq!(first.intervals_in("1"), &[Interval::new(1, 500000).expect("interval")]);
        assert_eq!(
            second.intervals_in("1"),
            &[Interval::new(500001, 1000000).expect("interval")]
        );
    }

    #[test]
    fn odd_sized_interval_splits_into_adjacent_halves() {
        let (first, second) = Bisector.split(&set("1:10-12")).expect("expected split");
        assert_eq!(first.extent() + second.extent(), 3);
        assert_eq!(first.intervals_in("1")[0].last() + 1, second.intervals_in("1")[0].first());
    }

    #[test]
    fn two_intervals_go_one_per_side() {
        let (first, second) = Bisector.split(&set("1:1-10,2:1-1000")).expect("expected split");
        assert_eq!(first.extent(), 10);
        assert_eq!(second.extent(), 1000);
    }

    #[test]
    fn accumulates_until_half() {
        let (first, second) =
            Bisector.split(&set("1:1-100,1:201-300,2:1-100,3:1-100")).expect("expected split");
        assert_eq!(first.extent(), 300);
        assert_eq!(second.extent(), 100);
        assert_eq!(second.contigs().collect::<Vec<_>>(), vec!["3"]);
    }

    #[test]
    fn oversized_trailing_interval_is_moved() {
        let (first, second) = Bisector.split(&set("1:1-5,2:1-5,3:1-1000")).expect("expected split");
        assert_eq!(first.extent(), 10);
        assert_eq!(second.extent(), 1000);
        assert_eq!(second.contigs().collect::<Vec<_>>(), vec!["3"]);
    }

    #[test]
    fn single_base_cannot_split() {
        assert!(matches!(
            Bisector.split(&set("1:5-5")),
            Err(AppError::ImpossibleSplit { intervals: 1, extent: 1 })
        ));
        assert!(Bisector.split(&IntervalSet::new()).is_err());
    }
}
