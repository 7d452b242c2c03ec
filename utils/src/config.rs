use std::env;

pub use ::config::ConfigError;

const ENV_PREFIX: &str = "LNHUB";

/// Loads `${FILE_NAME}.${ENV}.toml` and overlays `LNHUB_*` environment variables, `__` separating nested keys.
pub fn get_config_from_env<'a, T: 'a>() -> Result<T, config::ConfigError>
where
    T: serde::Deserialize<'a>,
{
    let environment: String = env::var("ENV").unwrap_or_else(|_| "dev".into());
    let file_name: String = env::var("FILE_NAME")
        .map_err(|_| config::ConfigError::Message("FILE_NAME was not specified as an environment variable.".into()))?;

    let file_path = format!("{}.{}.toml", file_name, environment);
    get_config_from_path(&file_path)
}

pub fn get_config_from_path<'a, T: 'a>(file_path: &str) -> Result<T, config::ConfigError>
where
    T: serde::Deserialize<'a>,
{
    let mut configuration = config::Config::default();
    configuration.merge(config::File::with_name(file_path))?;
    configuration.merge(config::Environment::with_prefix(ENV_PREFIX).separator("__"))?;
    configuration.try_into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Deserialize, Debug)]
    struct Nested {
        port: u16,
    }

    #[derive(Deserialize, Debug)]
    struct Settings {
        name: String,
        nested: Nested,
    }

    #[test]
    fn reads_nested_tables_from_toml() {
        let path = env::temp_dir().join("utils_config_test.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "name = \"lnhub\"\n[nested]\nport = 8080").unwrap();

        let settings: Settings = get_config_from_path(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.name, "lnhub");
        assert_eq!(settings.nested.port, 8080);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(get_config_from_path::<Settings>("/definitely/not/here.toml").is_err());
    }
}
