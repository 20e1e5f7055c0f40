//! Data source configuration and schema-driven structural equality.
//!
//! Two data source configurations are equal when every declared property
//! compares equal. The property list is an explicit table of accessors so
//! that adding a field without registering it is caught by the
//! `test_every_field_is_declared` test rather than silently ignored.

use serde::{Deserialize, Serialize};

/// A property value borrowed from a [`DataSourceConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyValue<'a> {
    /// Optional text property.
    Text(Option<&'a str>),
    /// Integer property.
    Int(i64),
    /// Boolean property.
    Bool(bool),
}

/// Describes one named property of a [`DataSourceConfig`].
#[derive(Clone, Copy)]
pub struct PropertyDescriptor {
    /// Property name as it appears in configuration files.
    pub name: &'static str,
    /// Reads the property from a configuration.
    pub get: for<'a> fn(&'a DataSourceConfig) -> PropertyValue<'a>,
}

impl std::fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Connection bootstrap settings for the engine's data source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Database name.
    #[serde(default)]
    pub database_name: Option<String>,
    /// Logical data source name.
    #[serde(default)]
    pub data_source_name: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// User name.
    #[serde(default)]
    pub user: Option<String>,
    /// Password.
    #[serde(default)]
    pub password: Option<String>,
    /// Server host name.
    #[serde(default)]
    pub server_name: Option<String>,
    /// Server port.
    #[serde(default)]
    pub port_number: u16,
    /// Login timeout in seconds (0 means no timeout).
    #[serde(default)]
    pub login_timeout_secs: u32,
    /// Extra connection attributes (`key=value;key=value`).
    #[serde(default)]
    pub connection_attributes: Option<String>,
    /// Create the database on first connection.
    #[serde(default)]
    pub create_database: bool,
}

fn database_name(c: &DataSourceConfig) -> PropertyValue<'_> {
    PropertyValue::Text(c.database_name.as_deref())
}

fn data_source_name(c: &DataSourceConfig) -> PropertyValue<'_> {
    PropertyValue::Text(c.data_source_name.as_deref())
}

fn description(c: &DataSourceConfig) -> PropertyValue<'_> {
    PropertyValue::Text(c.description.as_deref())
}

fn user(c: &DataSourceConfig) -> PropertyValue<'_> {
    PropertyValue::Text(c.user.as_deref())
}

fn password(c: &DataSourceConfig) -> PropertyValue<'_> {
    PropertyValue::Text(c.password.as_deref())
}

fn server_name(c: &DataSourceConfig) -> PropertyValue<'_> {
    PropertyValue::Text(c.server_name.as_deref())
}

fn port_number(c: &DataSourceConfig) -> PropertyValue<'_> {
    PropertyValue::Int(i64::from(c.port_number))
}

fn login_timeout(c: &DataSourceConfig) -> PropertyValue<'_> {
    PropertyValue::Int(i64::from(c.login_timeout_secs))
}

fn connection_attributes(c: &DataSourceConfig) -> PropertyValue<'_> {
    PropertyValue::Text(c.connection_attributes.as_deref())
}

fn create_database(c: &DataSourceConfig) -> PropertyValue<'_> {
    PropertyValue::Bool(c.create_database)
}

impl DataSourceConfig {
    /// The declared property schema, in a stable order.
    pub const PROPERTIES: &'static [PropertyDescriptor] = &[
        PropertyDescriptor { name: "databaseName", get: database_name },
        PropertyDescriptor { name: "dataSourceName", get: data_source_name },
        PropertyDescriptor { name: "description", get: description },
        PropertyDescriptor { name: "user", get: user },
        PropertyDescriptor { name: "password", get: password },
        PropertyDescriptor { name: "serverName", get: server_name },
        PropertyDescriptor { name: "portNumber", get: port_number },
        PropertyDescriptor { name: "loginTimeout", get: login_timeout },
        PropertyDescriptor { name: "connectionAttributes", get: connection_attributes },
        PropertyDescriptor { name: "createDatabase", get: create_database },
    ];

    /// Creates a configuration for the named database.
    #[must_use]
    pub fn for_database(name: impl Into<String>) -> Self {
        Self {
            database_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Looks up a property by its declared name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<PropertyValue<'_>> {
        Self::PROPERTIES
            .iter()
            .find(|p| p.name == name)
            .map(|p| (p.get)(self))
    }

    /// Returns the names of the properties whose values differ.
    #[must_use]
    pub fn property_diff(&self, other: &Self) -> Vec<&'static str> {
        Self::PROPERTIES
            .iter()
            .filter(|p| (p.get)(self) != (p.get)(other))
            .map(|p| p.name)
            .collect()
    }
}

impl PartialEq for DataSourceConfig {
    fn eq(&self, other: &Self) -> bool {
        Self::PROPERTIES
            .iter()
            .all(|p| (p.get)(self) == (p.get)(other))
    }
}

impl Eq for DataSourceConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataSourceConfig {
        DataSourceConfig {
            database_name: Some("wombat".into()),
            user: Some("app".into()),
            password: Some("secret".into()),
            server_name: Some("localhost".into()),
            port_number: 1527,
            login_timeout_secs: 10,
            create_database: true,
            ..DataSourceConfig::default()
        }
    }

    #[test]
    fn test_equal_configs() {
        assert_eq!(sample(), sample());
        assert!(sample().property_diff(&sample()).is_empty());
    }

    #[test]
    fn test_diff_names_changed_properties() {
        let mut other = sample();
        other.port_number = 1528;
        other.description = Some("replica".into());

        assert_ne!(sample(), other);
        assert_eq!(sample().property_diff(&other), vec!["description", "portNumber"]);
    }

    #[test]
    fn test_property_lookup() {
        let config = sample();
        assert_eq!(
            config.property("databaseName"),
            Some(PropertyValue::Text(Some("wombat")))
        );
        assert_eq!(config.property("createDatabase"), Some(PropertyValue::Bool(true)));
        assert_eq!(config.property("noSuchProperty"), None);
    }

    #[test]
    fn test_every_field_is_declared() {
        // Flipping each field one at a time must produce exactly one diff.
        let base = DataSourceConfig::default();
        let variants: Vec<DataSourceConfig> = vec![
            DataSourceConfig { database_name: Some("x".into()), ..base.clone() },
            DataSourceConfig { data_source_name: Some("x".into()), ..base.clone() },
            DataSourceConfig { description: Some("x".into()), ..base.clone() },
            DataSourceConfig { user: Some("x".into()), ..base.clone() },
            DataSourceConfig { password: Some("x".into()), ..base.clone() },
            DataSourceConfig { server_name: Some("x".into()), ..base.clone() },
            DataSourceConfig { port_number: 1, ..base.clone() },
            DataSourceConfig { login_timeout_secs: 1, ..base.clone() },
            DataSourceConfig { connection_attributes: Some("x".into()), ..base.clone() },
            DataSourceConfig { create_database: true, ..base.clone() },
        ];
        assert_eq!(variants.len(), DataSourceConfig::PROPERTIES.len());
        for variant in &variants {
            assert_eq!(base.property_diff(variant).len(), 1);
        }
    }
}
