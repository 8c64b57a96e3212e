use itertools::{EitherOrBoth, Itertools};

use super::{TopKCoefficientSet, WaveletCoefficient};

/// Merges two key-sorted coefficient sequences into one, re-applying the
/// `threshold`.
///
/// Coefficients present on both sides are summed, which is exact because
/// the Haar transform is linear. Unsorted input silently yields a wrong
/// result; [`WaveletSynopsis`](super::WaveletSynopsis) only ever holds
/// sorted sequences.
pub fn merge_coefficients(
    left: &[WaveletCoefficient],
    right: &[WaveletCoefficient],
    threshold: usize,
) -> Vec<WaveletCoefficient> {
    debug_assert!(left.windows(2).all(|w| w[0].index() < w[1].index()));
    debug_assert!(right.windows(2).all(|w| w[0].index() < w[1].index()));

    let mut output = TopKCoefficientSet::new(threshold);
    let merged = left
        .iter()
        .merge_join_by(right.iter(), |a, b| a.index().cmp(&b.index()));
    for entry in merged {
        let coefficient = match entry {
            EitherOrBoth::Left(c) | EitherOrBoth::Right(c) => c.clone(),
            EitherOrBoth::Both(a, b) => {
                WaveletCoefficient::new(a.value() + b.value(), a.level(), a.index())
            }
        };
        output.add(coefficient);
    }
    output.into_sorted()
}
