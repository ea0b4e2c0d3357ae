//! Column mapping for the GeoLite2 City CSV tables

use crate::{IndexError, Result};
use csv::StringRecord;
use iploc_core::LocationRecord;
use iploc_db::RangeRecord;

/// Fields read from the locations table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationField {
    Id,
    CountryIso,
    Region,
    City,
}

/// Fields read from the blocks table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockField {
    Network,
    PrefixLen,
    LocationId,
    Latitude,
    Longitude,
}

/// How network fields that are not IPv4-mapped are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NetworkForm {
    /// Only `::ffff:a.b.c.d/N` rows are indexed; others are skipped
    #[default]
    MappedOnly,
    /// Plain `a.b.c.d/N` rows are rewritten to mapped form and indexed
    MapPlainIpv4,
}

/// Column offsets of the locations table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationsSchema {
    pub id: usize,
    pub country_iso: usize,
    pub region: usize,
    pub city: usize,
}

impl LocationsSchema {
    pub fn column_index_for(&self, field: LocationField) -> usize {
        match field {
            LocationField::Id => self.id,
            LocationField::CountryIso => self.country_iso,
            LocationField::Region => self.region,
            LocationField::City => self.city,
        }
    }

    pub(crate) fn record(&self, row: &StringRecord) -> Result<LocationRecord> {
        let id = column(row, self.id, "location id")?;
        let country = column(row, self.country_iso, "country iso code")?;
        let region = column(row, self.region, "region")?;
        let city = column(row, self.city, "city")?;
        Ok(LocationRecord::from_parts(id, city, country, region))
    }
}

/// Column offsets of the blocks table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlocksSchema {
    pub network: usize,
    /// Set when the prefix length sits in its own column
    pub prefix_len: Option<usize>,
    pub location_id: usize,
    pub latitude: usize,
    pub longitude: usize,
}

/// One blocks row split into its network text and stored value
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BlockRow {
    pub network: String,
    pub record: RangeRecord,
}

impl BlocksSchema {
    pub fn column_index_for(&self, field: BlockField) -> Option<usize> {
        match field {
            BlockField::Network => Some(self.network),
            BlockField::PrefixLen => self.prefix_len,
            BlockField::LocationId => Some(self.location_id),
            BlockField::Latitude => Some(self.latitude),
            BlockField::Longitude => Some(self.longitude),
        }
    }

    fn is_mapped(&self, idx: usize) -> bool {
        idx == self.network
            || Some(idx) == self.prefix_len
            || idx == self.location_id
            || idx == self.latitude
            || idx == self.longitude
    }

    pub(crate) fn split(&self, row: &StringRecord) -> Result<BlockRow> {
        let network = column(row, self.network, "network")?;
        let network = match self.prefix_len {
            Some(idx) => format!("{}/{}", network, column(row, idx, "prefix length")?),
            None => network.to_string(),
        };

        let record = RangeRecord {
            location_id: column(row, self.location_id, "location id")?.to_string(),
            latitude: coordinate(column(row, self.latitude, "latitude")?),
            longitude: coordinate(column(row, self.longitude, "longitude")?),
            extra: row
                .iter()
                .enumerate()
                .filter(|(idx, _)| !self.is_mapped(*idx))
                .map(|(_, value)| value.to_string())
                .collect(),
        };

        Ok(BlockRow { network, record })
    }
}

/// Layout of both dataset tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetSchema {
    pub locations: LocationsSchema,
    pub blocks: BlocksSchema,
    pub network_form: NetworkForm,
}

impl Default for DatasetSchema {
    fn default() -> Self {
        Self::current()
    }
}

impl DatasetSchema {
    /// GeoLite2 City CSV as currently distributed
    ///
    /// `geoname_id,locale_code,continent_code,continent_name,country_iso_code,
    /// country_name,subdivision_1_iso_code,subdivision_1_name,city_name,...`
    /// and `network,geoname_id,registered_country_geoname_id,...,latitude,
    /// longitude,accuracy_radius`.
    pub fn current() -> Self {
        Self {
            locations: LocationsSchema {
                id: 0,
                country_iso: 4,
                region: 7,
                city: 8,
            },
            blocks: BlocksSchema {
                network: 0,
                prefix_len: None,
                location_id: 1,
                latitude: 7,
                longitude: 8,
            },
            network_form: NetworkForm::MappedOnly,
        }
    }

    /// 2014 GeoLite2 City CSV with a separate prefix-length column
    pub fn legacy() -> Self {
        Self {
            locations: LocationsSchema {
                id: 0,
                country_iso: 3,
                region: 6,
                city: 7,
            },
            blocks: BlocksSchema {
                network: 0,
                prefix_len: Some(1),
                location_id: 2,
                latitude: 6,
                longitude: 7,
            },
            network_form: NetworkForm::MappedOnly,
        }
    }

    pub fn with_network_form(mut self, form: NetworkForm) -> Self {
        self.network_form = form;
        self
    }
}

fn column<'r>(row: &'r StringRecord, idx: usize, name: &str) -> Result<&'r str> {
    row.get(idx).ok_or_else(|| {
        let line = row.position().map_or(0, |pos| pos.line());
        IndexError::Dataset(format!(
            "line {}: missing {} column {} ({} columns present)",
            line,
            name,
            idx,
            row.len()
        ))
    })
}

fn coordinate(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
