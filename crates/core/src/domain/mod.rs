pub mod assignment;
pub mod params;
pub mod result;
pub mod routing;
