//! Cross-node agreement via the modal mean
//!
//! Nodes that are truly synchronized report identical (or near-identical)
//! counter observations. The most frequent value is robust against a
//! minority of outliers, so deviation is measured from the mean of the
//! samples equal to the mode rather than from the raw mean, which an
//! outlier would drag.

use std::collections::HashMap;

use lockstep_core::{LockstepError, LockstepResult};

/// Modal mean and the samples that disagree with it.
#[derive(Clone, Debug, PartialEq)]
pub struct AgreementOutcome {
    pub modal_mean: f64,
    /// `(index, value)` of every sample deviating beyond the tolerance.
    pub outliers: Vec<(usize, u64)>,
}

/// Mean of the samples equal to the most frequent value(s).
///
/// Degenerate inputs are a hard failure, never a silent pass: an empty
/// sample set, a set where no value repeats, or a mode of zero (the
/// counters never started) all refuse to produce a reference value.
pub fn modal_mean(values: &[u64]) -> LockstepResult<f64> {
    if values.is_empty() {
        return Err(LockstepError::DegenerateAgreement("no samples".into()));
    }
    if values.len() == 1 {
        return Ok(values[0] as f64);
    }

    let mut counts: HashMap<u64, usize> = HashMap::new();
    for &v in values {
        *counts.entry(v).or_default() += 1;
    }
    let max_count = counts.values().copied().max().unwrap_or(0);
    if max_count < 2 {
        return Err(LockstepError::DegenerateAgreement(format!(
            "no value repeats across {} samples",
            values.len()
        )));
    }

    let modal: Vec<u64> = counts
        .iter()
        .filter(|(_, &c)| c == max_count)
        .map(|(&v, _)| v)
        .collect();
    if modal.iter().all(|&v| v == 0) {
        return Err(LockstepError::DegenerateAgreement(
            "the most frequent sample is zero".into(),
        ));
    }

    let mut sum = 0.0;
    let mut n = 0usize;
    for &v in values {
        if modal.contains(&v) {
            sum += v as f64;
            n += 1;
        }
    }
    Ok(sum / n as f64)
}

/// Find every sample deviating from the modal mean beyond `tolerance`.
pub fn check_agreement(values: &[u64], tolerance: f64) -> LockstepResult<AgreementOutcome> {
    let reference = modal_mean(values)?;
    let outliers = values
        .iter()
        .enumerate()
        .filter(|(_, &v)| (v as f64 - reference).abs() > tolerance)
        .map(|(i, &v)| (i, v))
        .collect();
    Ok(AgreementOutcome {
        modal_mean: reference,
        outliers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_outlier_is_flagged() {
        // Seven nodes agree, one deviates by twice the tolerance.
        let tolerance = 4.0;
        let mut values = vec![1000u64; 7];
        values.push(1000 + 2 * tolerance as u64);

        let outcome = check_agreement(&values, tolerance).unwrap();
        assert_eq!(outcome.modal_mean, 1000.0);
        assert_eq!(outcome.outliers, vec![(7, 1008)]);
    }

    #[test]
    fn test_agreement_within_tolerance_passes() {
        let values = vec![1000, 1000, 1000, 1003];
        let outcome = check_agreement(&values, 4.0).unwrap();
        assert!(outcome.outliers.is_empty());
    }

    #[test]
    fn test_all_distinct_is_degenerate() {
        let err = modal_mean(&[1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, LockstepError::DegenerateAgreement(_)));
    }

    #[test]
    fn test_zero_mode_is_degenerate() {
        let err = modal_mean(&[0, 0, 0, 7]).unwrap_err();
        assert!(matches!(err, LockstepError::DegenerateAgreement(_)));
    }

    #[test]
    fn test_tied_modes_average() {
        // 5 and 7 both occur twice; the modal mean covers both groups.
        let mean = modal_mean(&[5, 5, 7, 7]).unwrap();
        assert_eq!(mean, 6.0);
    }

    #[test]
    fn test_empty_input_is_degenerate() {
        assert!(modal_mean(&[]).is_err());
    }
}
