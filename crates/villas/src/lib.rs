//! Villas and their catalog.
//!
//! A villa references one category and one location, links to any number of
//! amenities and carries an ordered list of image keys.

pub mod catalog;
pub mod villa;

pub use catalog::{Amenity, AmenityType, Category, Location, NewAmenity};
pub use villa::{NewVilla, Villa, VillaDetails, VillaPatch};
