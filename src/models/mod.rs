pub mod geodesic_regression;

pub use geodesic_regression::{GeodesicRegression, TimeSeriesDataset};
