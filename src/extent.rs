//! Selections used for sliced dataset reads.
//!
//! A [`Selection`] is either the whole dataset or one [`Extent`] per axis. Extents are
//! resolved against the dataset shape into half-open `[lo, hi)` ranges before a request is
//! sent to a worker, so an out-of-bounds or wrong-rank selection is rejected without any
//! round-trip.
//!
//! ```rust
//! # use remoteh5::extent::{Extent, Selection};
//! fn take(s: impl Into<Selection>) -> Selection { s.into() }
//! // everything
//! take(..);
//! // samples 10 to 20 of a 1-D dataset
//! take(10..20);
//! // samples 0..100 of the first five channels
//! take([0..100, 0..5]);
//! // mixed kinds need explicit extents
//! take([Extent::from(3..), Extent::from(..2)]);
//! // start and count
//! take([(0, 100), (2, 3)]);
//! ```
use std::ops::{Range, RangeFrom, RangeFull, RangeInclusive, RangeTo, RangeToInclusive};

use itertools::izip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The part of one axis to read.
pub enum Extent {
    /// The whole axis
    Full,
    /// From `start` to the end of the axis
    From { start: u64 },
    /// `[start, end)`
    Range { start: u64, end: u64 },
    /// `count` elements from `start`
    Count { start: u64, count: u64 },
    /// A single element, the axis is kept with length one
    Index(u64),
}

impl From<RangeFull> for Extent {
    fn from(_: RangeFull) -> Self {
        Extent::Full
    }
}

impl From<u64> for Extent {
    fn from(i: u64) -> Self {
        Extent::Index(i)
    }
}

impl From<Range<u64>> for Extent {
    fn from(r: Range<u64>) -> Self {
        Extent::Range {
            start: r.start,
            end: r.end,
        }
    }
}

impl From<RangeFrom<u64>> for Extent {
    fn from(r: RangeFrom<u64>) -> Self {
        Extent::From { start: r.start }
    }
}

impl From<RangeTo<u64>> for Extent {
    fn from(r: RangeTo<u64>) -> Self {
        Extent::Range { start: 0, end: r.end }
    }
}

impl From<RangeInclusive<u64>> for Extent {
    fn from(r: RangeInclusive<u64>) -> Self {
        Extent::Range {
            start: *r.start(),
            end: r.end() + 1,
        }
    }
}

impl From<RangeToInclusive<u64>> for Extent {
    fn from(r: RangeToInclusive<u64>) -> Self {
        Extent::Range {
            start: 0,
            end: r.end + 1,
        }
    }
}

impl From<(u64, u64)> for Extent {
    fn from((start, count): (u64, u64)) -> Self {
        Extent::Count { start, count }
    }
}

impl Extent {
    /// Resolve against an axis of length `dim`.
    fn resolve(&self, dim: u64) -> Result<Range<u64>, anyhow::Error> {
        let r = match *self {
            Extent::Full => 0..dim,
            Extent::From { start } => start..dim,
            Extent::Range { start, end } => start..end,
            Extent::Count { start, count } => start..start.saturating_add(count),
            Extent::Index(i) => i..i.saturating_add(1),
        };

        anyhow::ensure!(
            r.start <= r.end,
            "range {}..{} is reversed",
            r.start,
            r.end
        );
        anyhow::ensure!(
            r.end <= dim,
            "range {}..{} exceeds axis length {}",
            r.start,
            r.end,
            dim
        );

        Ok(r)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// What to read from a dataset.
pub enum Selection {
    /// The full dataset
    #[default]
    All,
    /// One extent per axis
    Axes(Vec<Extent>),
}

impl From<RangeFull> for Selection {
    fn from(_: RangeFull) -> Self {
        Selection::All
    }
}

impl From<Vec<Extent>> for Selection {
    fn from(v: Vec<Extent>) -> Self {
        Selection::Axes(v)
    }
}

impl From<&[Extent]> for Selection {
    fn from(v: &[Extent]) -> Self {
        Selection::Axes(v.to_vec())
    }
}

impl<const N: usize> From<[Extent; N]> for Selection {
    fn from(v: [Extent; N]) -> Self {
        Selection::Axes(v.to_vec())
    }
}

impl From<&Selection> for Selection {
    fn from(s: &Selection) -> Self {
        s.clone()
    }
}

macro_rules! impl_selection_from {
    ($item: ty) => {
        impl From<$item> for Selection {
            fn from(item: $item) -> Self {
                Selection::Axes(vec![item.into()])
            }
        }
        impl From<Vec<$item>> for Selection {
            fn from(v: Vec<$item>) -> Self {
                Selection::Axes(v.into_iter().map(Extent::from).collect())
            }
        }
        impl From<&[$item]> for Selection {
            fn from(v: &[$item]) -> Self {
                Selection::Axes(v.iter().cloned().map(Extent::from).collect())
            }
        }
        impl<const N: usize> From<[$item; N]> for Selection {
            fn from(v: [$item; N]) -> Self {
                Selection::Axes(v.into_iter().map(Extent::from).collect())
            }
        }
    };
}

impl_selection_from!(u64);
impl_selection_from!(Range<u64>);
impl_selection_from!(RangeFrom<u64>);
impl_selection_from!(RangeTo<u64>);
impl_selection_from!(RangeInclusive<u64>);
impl_selection_from!(RangeToInclusive<u64>);
impl_selection_from!((u64, u64));

impl Selection {
    /// Concrete per-axis ranges for a dataset of `shape`. A scalar dataset (empty shape)
    /// only accepts [`Selection::All`].
    pub fn resolve(&self, shape: &[u64]) -> Result<Vec<Range<u64>>, anyhow::Error> {
        match self {
            Selection::All => Ok(shape.iter().map(|&d| 0..d).collect()),
            Selection::Axes(extents) => {
                anyhow::ensure!(
                    extents.len() == shape.len(),
                    "selection has {} axes but dataset has {}",
                    extents.len(),
                    shape.len()
                );

                izip!(extents, shape)
                    .map(|(e, &d)| e.resolve(d))
                    .collect()
            }
        }
    }

    /// Number of elements selected.
    pub fn count(&self, shape: &[u64]) -> Result<u64, anyhow::Error> {
        Ok(self
            .resolve(shape)?
            .iter()
            .map(|r| r.end - r.start)
            .product())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take(s: impl Into<Selection>) -> Selection {
        s.into()
    }

    #[test]
    fn conversions() {
        assert_eq!(take(..), Selection::All);
        assert_eq!(
            take(3..7),
            Selection::Axes(vec![Extent::Range { start: 3, end: 7 }])
        );
        assert_eq!(
            take([0..=4, 2..=2]),
            Selection::Axes(vec![
                Extent::Range { start: 0, end: 5 },
                Extent::Range { start: 2, end: 3 }
            ])
        );
        assert_eq!(
            take(vec![(1, 2), (3, 4)]),
            Selection::Axes(vec![
                Extent::Count { start: 1, count: 2 },
                Extent::Count { start: 3, count: 4 }
            ])
        );
        assert_eq!(take([5u64]), Selection::Axes(vec![Extent::Index(5)]));
    }

    #[test]
    fn resolve_against_shape() {
        let shape = [1000, 8];

        assert_eq!(take(..).resolve(&shape).unwrap(), vec![0..1000, 0..8]);
        assert_eq!(
            take([Extent::from(10..20), Extent::from(2..)])
                .resolve(&shape)
                .unwrap(),
            vec![10..20, 2..8]
        );
        assert_eq!(take([(0, 10), (7, 1)]).count(&shape).unwrap(), 10);
        assert_eq!(take([5u64, 5]).count(&shape).unwrap(), 1);
    }

    #[test]
    fn empty_range_is_allowed() {
        assert_eq!(take(4..4).count(&[10]).unwrap(), 0);
    }

    #[test]
    fn reject_wrong_rank() {
        let e = take([0..1, 0..1, 0..1]).resolve(&[10, 10]).unwrap_err();
        assert!(e.to_string().contains("3 axes"));
    }

    #[test]
    fn reject_out_of_bounds() {
        assert!(take(0..11).resolve(&[10]).is_err());
        assert!(take(10u64).resolve(&[10]).is_err());
        assert!(take((8, 3)).resolve(&[10]).is_err());
    }

    #[test]
    #[allow(clippy::reversed_empty_ranges)]
    fn reject_reversed() {
        assert!(take(5..2).resolve(&[10]).is_err());
    }

    #[test]
    fn scalar() {
        assert_eq!(take(..).count(&[]).unwrap(), 1);
        assert!(take(0..1).resolve(&[]).is_err());
    }
}
