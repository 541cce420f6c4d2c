/// A spatial point with a coordinate reference system identifier. The z
/// coordinate is absent for 2-D points; drivers that report NaN for a missing
/// z are normalized to `None` at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub srid: i32,
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Point {
    pub fn new(srid: i32, x: f64, y: f64, z: Option<f64>) -> Self {
        Self {
            srid,
            x,
            y,
            z: z.filter(|z| !z.is_nan()),
        }
    }
}
