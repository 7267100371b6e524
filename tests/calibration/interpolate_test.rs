//! Tests for calibration curve construction and interpolation.

use pondside::calibration::{interpolate, CalibrationCurve, CurveError};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn default_curve_hits_its_points() {
    let curve = CalibrationCurve::default_powder();
    assert!(approx(curve.interpolate(0.0), 20_000.0));
    assert!(approx(curve.interpolate(5.0), 15_000.0));
    assert!(approx(curve.interpolate(10.0), 10_000.0));
    assert!(approx(curve.interpolate(25.0), 0.0));
}

#[test]
fn probes_outside_the_curve_clamp() {
    let curve = CalibrationCurve::default_powder();
    assert!(approx(curve.interpolate(-5.0), 20_000.0));
    assert!(approx(curve.interpolate(30.0), 0.0));
}

#[test]
fn interior_probe_is_linear() {
    let curve = CalibrationCurve::default_powder();
    assert!(approx(curve.interpolate(7.5), 12_500.0));
    assert!(approx(curve.interpolate(17.5), 5_000.0));
}

#[test]
fn unsorted_points_are_sorted_on_construction() {
    let curve = match CalibrationCurve::new(vec![(10.0, 0.0), (0.0, 100.0)]) {
        Ok(curve) => curve,
        Err(err) => panic!("curve should build: {err}"),
    };
    assert_eq!(curve.points(), &[(0.0, 100.0), (10.0, 0.0)]);
    assert!(approx(curve.interpolate(2.5), 75.0));
}

#[test]
fn equal_x_neighbours_return_lower_point() {
    let points = [(0.0, 10.0), (5.0, 8.0), (5.0, 2.0), (10.0, 0.0)];
    assert!(approx(interpolate(&points, 5.0), 8.0));
}

#[test]
fn empty_and_non_finite_curves_are_rejected() {
    assert_eq!(CalibrationCurve::new(vec![]), Err(CurveError::Empty));
    assert!(matches!(
        CalibrationCurve::new(vec![(0.0, f64::NAN)]),
        Err(CurveError::NonFinite { .. })
    ));
    assert!(approx(interpolate(&[], 3.0), 0.0));
}

#[test]
fn single_point_curve_is_constant() {
    let curve = CalibrationCurve::new(vec![(4.0, 42.0)]).expect("should build");
    assert!(approx(curve.interpolate(-1.0), 42.0));
    assert!(approx(curve.interpolate(100.0), 42.0));
}

#[test]
fn curve_deserializes_from_point_list() {
    let curve: CalibrationCurve =
        serde_json::from_str("[[10, 0], [0, 1000]]").expect("should parse");
    assert!(approx(curve.interpolate(5.0), 500.0));
    assert!(serde_json::from_str::<CalibrationCurve>("[]").is_err());
}
