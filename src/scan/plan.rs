//! Sample positions visited by a campaign.

use crate::config::{ScanSettings, ScanType};
use crate::error::{AppResult, ScanError};

/// Half-open range `start, start + step, ...` stopping before `end`.
///
/// Empty when `start == end`. The step must be non-zero and point from `start`
/// towards `end`.
pub fn arange(start: f64, end: f64, step: f64) -> AppResult<Vec<f64>> {
    if step == 0.0 || !step.is_finite() {
        return Err(ScanError::Plan(format!("step size must be non-zero, got {step}")));
    }
    let span = end - start;
    if span == 0.0 {
        return Ok(Vec::new());
    }
    if span.signum() != step.signum() {
        return Err(ScanError::Plan(format!(
            "step {step} does not lead from {start} to {end}"
        )));
    }
    // Guard against 0.30000000000000004-style overshoot producing an extra point.
    let count = (span / step - 1e-9).ceil().max(0.0) as usize;
    Ok((0..count).map(|i| start + i as f64 * step).collect())
}

/// Stage positions for one data set. `None` leaves the stage where it is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScanPosition {
    /// Vertical position, when moved.
    pub y: Option<f64>,
    /// Horizontal position, when moved.
    pub x: Option<f64>,
}

/// Positions for the configured scan type, in acquisition order.
pub fn positions(scan: &ScanSettings) -> AppResult<Vec<ScanPosition>> {
    let vertical = || {
        arange(
            scan.vertical_scan_start,
            scan.vertical_scan_end,
            scan.vertical_scan_step_size,
        )
    };

    let plan: Vec<ScanPosition> = match scan.scan_type {
        ScanType::Standard => vec![ScanPosition { y: None, x: None }],
        ScanType::Vertical => vertical()?
            .into_iter()
            .map(|y| ScanPosition {
                y: Some(y),
                x: None,
            })
            .collect(),
        ScanType::Mosaic => {
            let xs = arange(
                scan.horizontal_scan_start,
                scan.horizontal_scan_end,
                scan.horizontal_scan_step_size,
            )?;
            vertical()?
                .into_iter()
                .flat_map(|y| {
                    xs.iter().map(move |x| ScanPosition {
                        y: Some(y),
                        x: Some(*x),
                    })
                })
                .collect()
        }
    };

    if plan.is_empty() {
        return Err(ScanError::Plan(format!(
            "{:?} scan has no positions",
            scan.scan_type
        )));
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arange_matches_numpy() {
        assert_eq!(arange(0.0, 3.0, 1.0).unwrap(), vec![0.0, 1.0, 2.0]);
        assert_eq!(arange(0.0, 1.0, 0.4).unwrap().len(), 3);
        assert_eq!(arange(2.0, 0.0, -0.5).unwrap(), vec![2.0, 1.5, 1.0, 0.5]);
        assert_eq!(arange(0.0, 0.3, 0.1).unwrap().len(), 3);
        assert!(arange(1.0, 1.0, 0.5).unwrap().is_empty());
    }

    #[test]
    fn test_arange_rejects_bad_steps() {
        assert!(arange(0.0, 1.0, 0.0).is_err());
        let err = arange(0.0, 1.0, -0.1).unwrap_err();
        assert!(err.to_string().contains("does not lead"));
    }

    #[test]
    fn test_standard_is_one_position() {
        let scan = ScanSettings::default();
        assert_eq!(
            positions(&scan).unwrap(),
            vec![ScanPosition { y: None, x: None }]
        );
    }

    #[test]
    fn test_mosaic_runs_y_outer_x_inner() {
        let scan = ScanSettings {
            scan_type: ScanType::Mosaic,
            vertical_scan_start: 0.0,
            vertical_scan_end: 2.0,
            vertical_scan_step_size: 1.0,
            horizontal_scan_start: 10.0,
            horizontal_scan_end: 12.0,
            horizontal_scan_step_size: 1.0,
            ..ScanSettings::default()
        };
        let plan = positions(&scan).unwrap();
        let coords: Vec<(f64, f64)> = plan
            .iter()
            .map(|p| (p.y.unwrap(), p.x.unwrap()))
            .collect();
        assert_eq!(
            coords,
            vec![(0.0, 10.0), (0.0, 11.0), (1.0, 10.0), (1.0, 11.0)]
        );
    }

    #[test]
    fn test_empty_vertical_scan_is_an_error() {
        let scan = ScanSettings {
            scan_type: ScanType::Vertical,
            vertical_scan_start: 1.0,
            vertical_scan_end: 1.0,
            ..ScanSettings::default()
        };
        assert!(matches!(positions(&scan), Err(ScanError::Plan(_))));
    }
}
