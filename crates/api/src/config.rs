//! Module configuration.
//!
//! A syzygy process carries one [Config], a json object keyed by module
//! name. Each module owns the shape of its own entry and pulls it out
//! with [Config::get_module_config].

use crate::*;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> SzgResult<D> {
    serde_json::from_value(
        serde_json::to_value(s).map_err(|e| SzgError::other_src("encode", e))?,
    )
    .map_err(|e| SzgError::other_src("decode", e))
}

/// Denotes a type used to configure a specific syzygy module.
///
/// Implementors should tolerate missing properties (`#[serde(default)]`)
/// since config files are edited by hand.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
}

/// Process-wide module configuration.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Config(serde_json::Map<String, serde_json::Value>);

impl Config {
    /// Parse a config from json text.
    pub fn from_json_str(json: &str) -> SzgResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SzgError::other_src("invalid config json", e))
    }

    /// Write the default config of module `M` under `module_name`.
    /// Used when generating an example config file.
    pub fn add_default_module_config<M: ModConfig>(
        &mut self,
        module_name: impl Into<String>,
    ) -> SzgResult<()> {
        let module_name = module_name.into();
        if self.0.contains_key(&module_name) {
            return Err(SzgError::other(format!(
                "Refusing to overwrite conflicting module name: {module_name}"
            )));
        }
        self.0.insert(module_name, tc(&M::default())?);
        Ok(())
    }

    /// Extract the config of module `M`, or its default if the module
    /// has no entry.
    pub fn get_module_config<M: ModConfig>(
        &self,
        module_name: &str,
    ) -> SzgResult<M> {
        self.0
            .get(module_name)
            .map(tc)
            .unwrap_or_else(|| Ok(M::default()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
    #[serde(default, rename_all = "camelCase")]
    struct Pool {
        first_port: u16,
        block_size: u16,
    }

    impl Default for Pool {
        fn default() -> Self {
            Self {
                first_port: 4700,
                block_size: 200,
            }
        }
    }

    impl ModConfig for Pool {}

    #[test]
    fn default_written_and_read_back() {
        let mut config = Config::default();
        config.add_default_module_config::<Pool>("pool").unwrap();
        assert!(config.add_default_module_config::<Pool>("pool").is_err());

        assert_eq!(
            serde_json::json!({
                "pool": { "firstPort": 4700, "blockSize": 200 }
            }),
            serde_json::to_value(&config).unwrap()
        );
    }

    #[test]
    fn partial_entry_uses_field_defaults() {
        let config = Config::from_json_str(
            r#"{ "pool": { "blockSize": 20 }, "other": { "x": 1 } }"#,
        )
        .unwrap();

        assert_eq!(
            Pool {
                first_port: 4700,
                block_size: 20,
            },
            config.get_module_config::<Pool>("pool").unwrap(),
        );

        assert_eq!(
            Pool::default(),
            config.get_module_config::<Pool>("missing").unwrap(),
        );
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(Config::from_json_str("[1, 2").is_err());
    }
}
