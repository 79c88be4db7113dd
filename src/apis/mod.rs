pub mod seoul_citydata;

pub use seoul_citydata::SeoulCityData;
