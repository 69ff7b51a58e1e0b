use crate::core::error::{FlowError, FlowResult};
use crate::core::histogram::{HistogramEntry, Interpolated};

/// Error scores of predicted key counts against ground truth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scores {
    pub mrd: f64,
    pub wmrd: f64,
}

fn check_lengths(pred: &[f64], truth: &[f64]) -> FlowResult<()> {
    if pred.len() != truth.len() {
        return Err(FlowError::LengthMismatch {
            predicted: pred.len(),
            truth: truth.len(),
        });
    }
    Ok(())
}

/// Mean relative difference, skipping positions where both sides are zero.
pub fn mrd(pred: &[f64], truth: &[f64]) -> FlowResult<f64> {
    check_lengths(pred, truth)?;
    let mut sum = 0.0;
    let mut n = 0usize;
    for (&p, &t) in pred.iter().zip(truth) {
        let mid = (p + t) / 2.0;
        if mid > 0.0 {
            sum += (p - t).abs() / mid;
            n += 1;
        }
    }
    Ok(if n == 0 { 0.0 } else { sum / n as f64 })
}

/// Weighted mean relative difference.
pub fn wmrd(pred: &[f64], truth: &[f64]) -> FlowResult<f64> {
    check_lengths(pred, truth)?;
    if pred.is_empty() {
        return Ok(0.0);
    }
    let n = pred.len() as f64;
    let diff: f64 = pred.iter().zip(truth).map(|(p, t)| (p - t).abs()).sum::<f64>() / n;
    let mid: f64 = pred.iter().zip(truth).map(|(p, t)| (p + t) / 2.0).sum::<f64>() / n;
    Ok(if mid > 0.0 { diff / mid } else { 0.0 })
}

/// Aligns `predicted` to the frequencies of `truth`, rounds, and scores it.
pub fn score(predicted: &Interpolated, truth: &[HistogramEntry]) -> FlowResult<Scores> {
    let freqs: Vec<u64> = truth.iter().map(|e| e.frequency).collect();
    let aligned: Vec<f64> = predicted
        .align_to(&freqs)?
        .into_iter()
        .map(|v| v as f64)
        .collect();
    let expected: Vec<f64> = truth.iter().map(|e| e.key_count as f64).collect();
    Ok(Scores {
        mrd: mrd(&aligned, &expected)?,
        wmrd: wmrd(&aligned, &expected)?,
    })
}
