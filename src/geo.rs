use crate::model::Coordinate;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters.
pub fn haversine_distance(p1: &Coordinate, p2: &Coordinate) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let dlat = (p2.latitude - p1.latitude).to_radians();
    let dlon = (p2.longitude - p1.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Sum of consecutive leg distances, in kilometers. Zero for fewer than two points.
pub fn path_length_km(points: &[Coordinate]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let meters: f64 = points
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum();
    meters / 1000.0
}
