pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres on a spherical Earth.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // rounding can push `a` a hair past 1 for antipodal points
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Distance rounded to two decimals, as presented to clients.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    round_km(haversine_km(lat1, lon1, lat2, lon2))
}

pub fn round_km(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_symmetric_and_zero_on_identity() {
        let points = [
            (-26.30, -48.84),
            (-23.5505, -46.6333),
            (89.9, 10.0),
            (-89.9, -170.0),
            (0.0, 179.99),
            (12.5, -179.99),
        ];
        for &(lat1, lon1) in &points {
            assert_eq!(distance_km(lat1, lon1, lat1, lon1), 0.0);
            for &(lat2, lon2) in &points {
                assert_eq!(
                    haversine_km(lat1, lon1, lat2, lon2),
                    haversine_km(lat2, lon2, lat1, lon1)
                );
            }
        }
    }

    #[test]
    fn matches_known_city_pair() {
        // Joinville to Curitiba is roughly 106 km as the crow flies.
        let km = distance_km(-26.3045, -48.8487, -25.4284, -49.2733);
        assert!((km - 106.0).abs() < 15.0, "unexpected distance {km}");
    }

    #[test]
    fn crosses_the_antemeridian_the_short_way() {
        let km = distance_km(0.0, 179.9, 0.0, -179.9);
        assert!((km - 22.24).abs() < 0.01, "unexpected distance {km}");
    }

    #[test]
    fn handles_polar_and_antipodal_inputs() {
        let pole_to_pole = distance_km(90.0, 0.0, -90.0, 0.0);
        let half_circumference = round_km(std::f64::consts::PI * EARTH_RADIUS_KM);
        assert_eq!(pole_to_pole, half_circumference);

        let antipodal = haversine_km(10.0, 20.0, -10.0, -160.0);
        assert!(antipodal.is_finite());
        assert!((antipodal - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-3);
    }

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(round_km(1.23456), 1.23);
        assert_eq!(round_km(1.235_01), 1.24);
        // one thousandth of a degree of latitude
        assert_eq!(distance_km(-26.30, -48.84, -26.301, -48.84), 0.11);
    }
}
