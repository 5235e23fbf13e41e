//! Continent classification by point-in-polygon
//!
//! **Algorithm:**
//! 1. The unresolved sentinel `(0, 0)` is always `Unknown`
//! 2. Exact containment (even-odd ray casting, holes excluded); shapes are
//!    tried in order and the first hit wins
//! 3. Otherwise the nearest shape within `buffer_km` wins, so coastal points
//!    that fall just outside a coarse outline still classify
//! 4. Otherwise `Unknown`
//!
//! Outlines come from a GeoJSON FeatureCollection when configured
//! (`properties.CONTINENT` names the continent); the built-in outlines are
//! coarse hand-drawn rings good to tens of kilometres.

use crate::config::SpatialConfig;
use crate::models::{Continent, GeoPoint};
use atlas_common::{Error, Result};
use serde_json::Value;
use std::path::Path;

/// Kilometres per degree of latitude
const KM_PER_DEG_LAT: f64 = 110.574;
/// Kilometres per degree of longitude at the equator
const KM_PER_DEG_LON: f64 = 111.320;

/// `(longitude, latitude)` vertex
type Vertex = (f64, f64);

#[derive(Debug, Clone)]
pub struct Polygon {
    exterior: Vec<Vertex>,
    holes: Vec<Vec<Vertex>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Vertex>, holes: Vec<Vec<Vertex>>) -> Self {
        Self { exterior, holes }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        ring_contains(&self.exterior, lon, lat)
            && !self.holes.iter().any(|hole| ring_contains(hole, lon, lat))
    }

    /// Approximate distance to the boundary in km (0 when inside)
    fn distance_km(&self, point: &GeoPoint) -> f64 {
        if self.contains(point.longitude, point.latitude) {
            return 0.0;
        }
        std::iter::once(&self.exterior)
            .chain(self.holes.iter())
            .map(|ring| ring_distance_km(ring, point))
            .fold(f64::INFINITY, f64::min)
    }
}

#[derive(Debug, Clone)]
pub struct ContinentShape {
    pub continent: Continent,
    pub polygons: Vec<Polygon>,
}

impl ContinentShape {
    fn contains(&self, point: &GeoPoint) -> bool {
        self.polygons
            .iter()
            .any(|p| p.contains(point.longitude, point.latitude))
    }

    fn distance_km(&self, point: &GeoPoint) -> f64 {
        self.polygons
            .iter()
            .map(|p| p.distance_km(point))
            .fold(f64::INFINITY, f64::min)
    }
}

#[derive(Debug, Clone)]
pub struct SpatialClassifier {
    shapes: Vec<ContinentShape>,
    buffer_km: f64,
}

impl SpatialClassifier {
    pub fn new(shapes: Vec<ContinentShape>, buffer_km: f64) -> Self {
        Self { shapes, buffer_km }
    }

    /// Classifier over the built-in outlines
    pub fn builtin(buffer_km: f64) -> Self {
        let shapes = BUILTIN_OUTLINES
            .iter()
            .map(|(continent, rings)| ContinentShape {
                continent: *continent,
                polygons: rings
                    .iter()
                    .map(|ring| Polygon::new(ring.to_vec(), Vec::new()))
                    .collect(),
            })
            .collect();
        Self::new(shapes, buffer_km)
    }

    /// GeoJSON outlines when configured, built-in otherwise
    pub fn from_config(config: &SpatialConfig) -> Result<Self> {
        match &config.continents_path {
            Some(path) => Self::from_geojson_file(path, config.buffer_km),
            None => Ok(Self::builtin(config.buffer_km)),
        }
    }

    pub fn from_geojson_file(path: &Path, buffer_km: f64) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read continents file {}: {}", path.display(), e))
        })?;
        let classifier = Self::from_geojson_str(&text, buffer_km)?;
        tracing::info!(
            path = %path.display(),
            shapes = classifier.shapes.len(),
            "Loaded continent outlines"
        );
        Ok(classifier)
    }

    /// Parse a FeatureCollection of Polygon/MultiPolygon features
    pub fn from_geojson_str(text: &str, buffer_km: f64) -> Result<Self> {
        let doc: Value = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("Invalid continents GeoJSON: {}", e)))?;
        let features = doc
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Config("Continents GeoJSON has no features array".into()))?;

        let mut shapes = Vec::new();
        for feature in features {
            let name = feature
                .get("properties")
                .and_then(|p| p.get("CONTINENT").or_else(|| p.get("continent")))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let continent = Continent::from_name(name);
            if !continent.is_known() {
                tracing::debug!(name, "Skipping feature with unrecognised continent");
                continue;
            }
            let polygons = feature
                .get("geometry")
                .map(parse_geometry)
                .transpose()?
                .unwrap_or_default();
            shapes.push(ContinentShape {
                continent,
                polygons,
            });
        }

        if shapes.is_empty() {
            return Err(Error::Config(
                "Continents GeoJSON contains no recognised continents".into(),
            ));
        }
        Ok(Self::new(shapes, buffer_km))
    }

    pub fn classify(&self, point: &GeoPoint) -> Continent {
        if point.is_sentinel() {
            return Continent::Unknown;
        }

        if let Some(shape) = self.shapes.iter().find(|s| s.contains(point)) {
            return shape.continent;
        }

        self.shapes
            .iter()
            .map(|s| (s.continent, s.distance_km(point)))
            .filter(|(_, d)| *d <= self.buffer_km)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(continent, _)| continent)
            .unwrap_or(Continent::Unknown)
    }
}

fn parse_geometry(geometry: &Value) -> Result<Vec<Polygon>> {
    let kind = geometry.get("type").and_then(Value::as_str).unwrap_or_default();
    let coords = geometry
        .get("coordinates")
        .ok_or_else(|| Error::Config("Geometry without coordinates".into()))?;
    match kind {
        "Polygon" => Ok(vec![parse_polygon(coords)?]),
        "MultiPolygon" => coords
            .as_array()
            .ok_or_else(|| Error::Config("MultiPolygon coordinates must be an array".into()))?
            .iter()
            .map(parse_polygon)
            .collect(),
        other => Err(Error::Config(format!("Unsupported geometry type: {}", other))),
    }
}

fn parse_polygon(value: &Value) -> Result<Polygon> {
    let rings = value
        .as_array()
        .ok_or_else(|| Error::Config("Polygon coordinates must be an array".into()))?;
    let mut parsed = rings.iter().map(parse_ring).collect::<Result<Vec<_>>>()?;
    if parsed.is_empty() {
        return Err(Error::Config("Polygon without rings".into()));
    }
    let exterior = parsed.remove(0);
    Ok(Polygon::new(exterior, parsed))
}

fn parse_ring(value: &Value) -> Result<Vec<Vertex>> {
    value
        .as_array()
        .ok_or_else(|| Error::Config("Ring must be an array".into()))?
        .iter()
        .map(|pos| {
            let lon = pos.get(0).and_then(Value::as_f64);
            let lat = pos.get(1).and_then(Value::as_f64);
            match (lon, lat) {
                (Some(lon), Some(lat)) => Ok((lon, lat)),
                _ => Err(Error::Config(format!("Invalid position: {}", pos))),
            }
        })
        .collect()
}

/// Even-odd rule; the ring may or may not repeat its first vertex
fn ring_contains(ring: &[Vertex], x: f64, y: f64) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn ring_distance_km(ring: &[Vertex], point: &GeoPoint) -> f64 {
    if ring.is_empty() {
        return f64::INFINITY;
    }
    // Local equirectangular projection centred on the point
    let kx = KM_PER_DEG_LON * point.latitude.to_radians().cos();
    let project = |(lon, lat): Vertex| -> (f64, f64) {
        let mut d_lon = lon - point.longitude;
        if d_lon > 180.0 {
            d_lon -= 360.0;
        } else if d_lon < -180.0 {
            d_lon += 360.0;
        }
        (d_lon * kx, (lat - point.latitude) * KM_PER_DEG_LAT)
    };

    let mut best = f64::INFINITY;
    let mut prev = project(ring[ring.len() - 1]);
    for vertex in ring {
        let current = project(*vertex);
        best = best.min(origin_to_segment(prev, current));
        prev = current;
    }
    best
}

/// Distance from the origin to segment `a`-`b` in the projected plane
fn origin_to_segment(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (-(a.0 * dx + a.1 * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (px, py) = (a.0 + t * dx, a.1 + t * dy);
    (px * px + py * py).sqrt()
}

/// Coarse continent outlines, `(lon, lat)`. Checked in this order.
const BUILTIN_OUTLINES: &[(Continent, &[&[Vertex]])] = &[
    (
        Continent::Europe,
        &[&[
            (-10.0, 36.0), (-10.0, 44.0), (-5.0, 48.5), (-11.0, 51.5), (-11.0, 58.0),
            (-25.0, 63.0), (-25.0, 67.0), (-13.0, 67.0), (5.0, 62.0), (15.0, 70.0),
            (30.0, 72.0), (60.0, 70.0), (68.0, 77.0), (66.0, 68.0), (60.0, 58.0),
            (59.0, 50.0), (52.0, 47.0), (49.0, 45.0), (47.0, 42.0), (41.0, 41.0),
            (36.0, 41.5), (29.0, 41.0), (26.0, 40.0), (28.0, 36.0), (20.0, 35.0),
            (12.0, 35.0), (10.0, 37.5), (0.0, 38.0), (-6.0, 36.0),
        ]],
    ),
    (
        Continent::Africa,
        &[
            &[
                (-17.5, 14.7), (-17.0, 21.0), (-13.0, 27.5), (-9.8, 30.0), (-6.0, 35.9),
                (-2.0, 35.2), (10.0, 37.3), (11.0, 33.0), (20.0, 32.5), (25.0, 32.0),
                (32.3, 31.3), (32.5, 30.0), (33.5, 27.5), (35.5, 23.5), (37.5, 18.0),
                (43.3, 12.5), (51.3, 11.8), (51.0, 10.5), (48.0, 4.5), (40.0, -2.5),
                (39.0, -8.0), (40.5, -15.0), (35.0, -23.0), (32.5, -29.0), (27.0, -34.0),
                (20.0, -35.0), (18.3, -34.4), (17.8, -32.5), (15.0, -27.0), (11.7, -17.0), (13.5, -11.0),
                (12.0, -5.0), (9.0, -1.0), (9.5, 4.0), (5.0, 6.0), (-2.0, 4.8),
                (-7.5, 4.4), (-13.0, 7.8), (-15.0, 11.0),
            ],
            &[(43.0, -25.5), (44.0, -16.0), (49.5, -12.0), (50.5, -15.5), (47.0, -25.5)],
        ],
    ),
    (
        Continent::Asia,
        &[
            &[
                (26.0, 40.0), (29.0, 41.0), (36.0, 41.5), (41.0, 41.0), (47.0, 42.0),
                (49.0, 45.0), (52.0, 47.0), (59.0, 50.0), (60.0, 58.0), (66.0, 68.0),
                (68.0, 77.0), (100.0, 80.0), (140.0, 76.0), (180.0, 72.0), (180.0, 65.0),
                (170.0, 60.0), (163.0, 56.0), (157.0, 51.0), (143.0, 47.0), (141.0, 41.0),
                (131.0, 34.0), (122.0, 31.0), (121.0, 25.0), (117.0, 22.0), (108.0, 21.0),
                (109.0, 12.0), (105.0, 8.5), (100.0, 13.0), (101.0, 7.0), (103.5, 4.0),
                (104.0, 1.3), (100.3, 5.0), (98.3, 8.0), (98.0, 16.0), (92.0, 22.0),
                (88.0, 21.5), (80.0, 15.0), (77.0, 8.0), (73.0, 16.0), (72.5, 21.0),
                (67.0, 24.5), (57.0, 25.5), (59.8, 22.3), (55.0, 17.0), (52.0, 16.0),
                (43.3, 12.5), (39.0, 21.0), (34.8, 28.0), (34.9, 29.5), (34.2, 31.3),
                (35.0, 33.0), (36.0, 36.0), (30.0, 36.2), (26.0, 38.0),
            ],
            // Japan
            &[
                (129.0, 31.0), (141.0, 35.0), (142.0, 40.0), (145.5, 44.0), (141.5, 45.5),
                (139.5, 42.0), (135.0, 34.0), (129.0, 33.5),
            ],
            // Philippines and Taiwan
            &[
                (117.0, 7.0), (120.0, 5.0), (126.5, 6.0), (126.5, 12.0), (122.5, 19.0),
                (121.9, 25.3), (120.0, 22.0), (119.5, 11.5),
            ],
            // Malay peninsula and the Indonesian archipelago
            &[
                (95.0, 6.0), (100.0, 6.5), (104.0, 1.5), (109.0, 2.0), (116.0, 7.5),
                (119.0, 5.5), (126.0, 4.0), (129.0, -2.5), (131.0, -8.0), (125.0, -10.5),
                (115.0, -9.0), (106.0, -7.0), (95.0, 3.0),
            ],
            // Sri Lanka
            &[(79.5, 6.0), (80.0, 9.9), (82.0, 7.5), (81.0, 6.0)],
        ],
    ),
    (
        Continent::NorthAmerica,
        &[
            &[
                (-168.0, 66.0), (-162.0, 71.0), (-140.0, 70.0), (-125.0, 71.0), (-95.0, 72.0),
                (-80.0, 74.0), (-65.0, 83.0), (-30.0, 83.0), (-20.0, 70.0), (-45.0, 59.0),
                (-55.0, 52.0), (-66.0, 44.0), (-70.0, 41.0), (-76.0, 35.0), (-80.0, 31.0),
                (-80.0, 25.0), (-83.0, 21.0), (-86.0, 21.0), (-88.0, 16.0), (-83.0, 15.0),
                (-83.0, 10.0), (-77.5, 8.0), (-78.0, 7.0), (-80.0, 7.0), (-86.0, 11.0),
                (-92.0, 14.0), (-105.0, 19.0), (-110.0, 23.0), (-118.0, 32.0), (-124.0, 40.0),
                (-125.0, 48.0), (-135.0, 57.0), (-150.0, 59.0), (-165.0, 54.0), (-168.0, 60.0),
            ],
            // Caribbean
            &[
                (-85.0, 23.5), (-74.0, 23.5), (-60.0, 18.5), (-59.0, 12.0), (-62.0, 10.8),
                (-75.0, 17.0), (-85.0, 21.0),
            ],
        ],
    ),
    (
        Continent::SouthAmerica,
        &[&[
            (-81.3, -4.5), (-80.0, 1.0), (-78.0, 7.0), (-77.5, 8.0), (-72.0, 12.5),
            (-62.0, 11.0), (-52.0, 5.0), (-35.0, -5.0), (-37.5, -12.0), (-39.0, -13.5),
            (-40.0, -20.0), (-42.0, -23.0), (-48.0, -26.0), (-57.0, -37.0), (-65.0, -42.0),
            (-66.0, -55.0), (-75.0, -53.0), (-74.0, -40.0), (-71.5, -30.0), (-70.3, -18.5),
            (-76.5, -14.0), (-78.0, -11.0), (-79.7, -7.0),
        ]],
    ),
    (
        Continent::Oceania,
        &[
            // Australia
            &[
                (113.0, -22.0), (114.0, -34.5), (116.0, -35.0), (123.0, -34.0), (131.0, -31.5),
                (138.0, -35.5), (141.0, -38.5), (147.0, -39.0), (150.0, -37.5), (153.6, -28.0),
                (153.0, -25.0), (146.0, -19.0), (142.5, -10.6), (141.5, -13.0), (141.0, -17.0),
                (136.0, -15.0), (137.0, -12.0), (132.0, -11.0), (129.0, -15.0), (125.0, -14.0),
                (122.0, -17.5),
            ],
            // Tasmania
            &[(144.5, -40.5), (148.5, -40.5), (148.0, -43.5), (146.0, -43.8)],
            // New Zealand
            &[
                (172.5, -34.3), (178.6, -37.6), (176.8, -40.0), (174.5, -41.5), (174.0, -44.0),
                (171.0, -46.5), (166.5, -46.3), (167.0, -44.5), (172.0, -40.5), (173.0, -39.0),
            ],
            // New Guinea
            &[
                (131.0, -1.0), (141.0, -2.5), (150.5, -6.0), (150.0, -10.7), (147.0, -10.2),
                (143.0, -9.0), (138.0, -8.3), (134.5, -4.0),
            ],
        ],
    ),
    (
        Continent::Antarctica,
        &[&[
            (-180.0, -90.0), (180.0, -90.0), (180.0, -65.0), (90.0, -64.0), (0.0, -69.0),
            (-57.0, -62.5), (-70.0, -68.0), (-130.0, -73.0), (-180.0, -77.0),
        ]],
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn test_major_cities() {
        let c = SpatialClassifier::builtin(50.0);
        let cases = [
            (48.8566, 2.3522, Continent::Europe),       // Paris
            (55.7558, 37.6173, Continent::Europe),      // Moscow
            (30.0444, 31.2357, Continent::Africa),      // Cairo
            (-18.8792, 47.5079, Continent::Africa),     // Antananarivo
            (39.9042, 116.4074, Continent::Asia),       // Beijing
            (35.6762, 139.6503, Continent::Asia),       // Tokyo
            (39.9334, 32.8597, Continent::Asia),        // Ankara
            (40.7128, -74.0060, Continent::NorthAmerica), // New York
            (19.4326, -99.1332, Continent::NorthAmerica), // Mexico City
            (-34.6037, -58.3816, Continent::SouthAmerica), // Buenos Aires
            (-12.0464, -77.0428, Continent::SouthAmerica), // Lima
            (-33.8688, 151.2093, Continent::Oceania),   // Sydney
            (-36.8485, 174.7633, Continent::Oceania),   // Auckland
            (-33.9249, 18.4241, Continent::Africa),     // Cape Town
            (-82.8628, 135.0, Continent::Antarctica),
        ];
        for (lat, lon, expected) in cases {
            assert_eq!(c.classify(&point(lat, lon)), expected, "({}, {})", lat, lon);
        }
    }

    #[test]
    fn test_sentinel_is_unknown() {
        let c = SpatialClassifier::builtin(50.0);
        assert_eq!(c.classify(&GeoPoint::SENTINEL), Continent::Unknown);
    }

    #[test]
    fn test_open_ocean_is_unknown() {
        let c = SpatialClassifier::builtin(50.0);
        assert_eq!(c.classify(&point(-30.0, -20.0)), Continent::Unknown);
        assert_eq!(c.classify(&point(10.0, -140.0)), Continent::Unknown);
    }

    const SQUARE: &str = r#"{
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": {"CONTINENT": "Europe"},
            "geometry": {"type": "Polygon", "coordinates": [[[10,10],[20,10],[20,20],[10,20],[10,10]]]}
        }]
    }"#;

    #[test]
    fn test_buffer_catches_nearby_points() {
        let strict = SpatialClassifier::from_geojson_str(SQUARE, 0.0).unwrap();
        let buffered = SpatialClassifier::from_geojson_str(SQUARE, 50.0).unwrap();

        // ~22 km west of the square's edge
        let near = point(15.0, 9.8);
        assert_eq!(strict.classify(&near), Continent::Unknown);
        assert_eq!(buffered.classify(&near), Continent::Europe);

        // ~330 km away
        assert_eq!(buffered.classify(&point(15.0, 7.0)), Continent::Unknown);
    }

    #[test]
    fn test_holes_are_excluded() {
        let geojson = r#"{
            "type": "FeatureCollection",
            "features": [{
                "properties": {"CONTINENT": "Asia"},
                "geometry": {"type": "MultiPolygon", "coordinates": [
                    [[[0,0],[40,0],[40,40],[0,40]], [[10,10],[30,10],[30,30],[10,30]]]
                ]}
            }]
        }"#;
        let c = SpatialClassifier::from_geojson_str(geojson, 0.0).unwrap();
        assert_eq!(c.classify(&point(5.0, 5.0)), Continent::Asia);
        assert_eq!(c.classify(&point(20.0, 20.0)), Continent::Unknown);
    }

    #[test]
    fn test_geojson_without_continents_rejected() {
        let err = SpatialClassifier::from_geojson_str(r#"{"features": []}"#, 50.0);
        assert!(matches!(err, Err(Error::Config(_))));
        assert!(SpatialClassifier::from_geojson_str("not json", 50.0).is_err());
    }
}
