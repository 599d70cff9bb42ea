pub mod citymapper;
pub mod error;
pub mod http;
pub mod kml;
pub mod lta;
pub mod onemap;
pub mod transitlink;
pub mod xml;
