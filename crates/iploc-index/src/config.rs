use crate::schema::DatasetSchema;

/// Capacity and target false-positive rate of one bloom filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSizing {
    pub expected_items: usize,
    pub fp_rate: f64,
}

impl FilterSizing {
    pub const fn new(expected_items: usize, fp_rate: f64) -> Self {
        Self {
            expected_items,
            fp_rate,
        }
    }
}

/// Build and lookup settings
///
/// The defaults size the filters for a full GeoLite2 City dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    /// `locationsSeen`: one entry per location id
    pub locations_filter: FilterSizing,
    /// `ipPrefixSeen`: two entries per range
    pub prefix_filter: FilterSizing,
    /// `visitedKeys`: created fresh for every lookup
    pub visited_filter: FilterSizing,
    pub schema: DatasetSchema,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            locations_filter: FilterSizing::new(500_000, 0.001),
            prefix_filter: FilterSizing::new(5_634_792, 0.001),
            visited_filter: FilterSizing::new(65_536, 0.01),
            schema: DatasetSchema::default(),
        }
    }
}

impl IndexConfig {
    pub fn with_schema(mut self, schema: DatasetSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Smaller filters for test fixtures
    pub fn compact() -> Self {
        Self {
            locations_filter: FilterSizing::new(1_000, 0.001),
            prefix_filter: FilterSizing::new(10_000, 0.001),
            visited_filter: FilterSizing::new(1_024, 0.01),
            schema: DatasetSchema::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::NetworkForm;

    #[test]
    fn test_default_sizing() {
        let config = IndexConfig::default();
        assert_eq!(config.locations_filter, FilterSizing::new(500_000, 0.001));
        assert_eq!(config.prefix_filter.expected_items, 5_634_792);
        assert_eq!(config.visited_filter, FilterSizing::new(65_536, 0.01));
        assert_eq!(config.schema, DatasetSchema::current());
    }

    #[test]
    fn test_with_schema() {
        let config = IndexConfig::compact().with_schema(DatasetSchema::legacy());
        assert_eq!(config.schema.blocks.prefix_len, Some(1));
        assert_eq!(config.schema.network_form, NetworkForm::MappedOnly);
    }
}
