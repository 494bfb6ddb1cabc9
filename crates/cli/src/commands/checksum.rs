use eyre::WrapErr;
use flightdeck_cache::{checksum, ReuseConfig};
use flightdeck_config::Settings;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

pub async fn execute(
    settings: &Settings,
    input: Option<PathBuf>,
    group: Option<String>,
) -> eyre::Result<()> {
    let raw = match &input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .wrap_err("failed to read stdin")?;
            raw
        }
    };

    let config = ReuseConfig::from(&settings.cache);
    println!("{}", render(&raw, &config, group.as_deref())?);
    Ok(())
}

fn render(raw: &str, config: &ReuseConfig, group: Option<&str>) -> eyre::Result<String> {
    let document: serde_json::Value =
        serde_json::from_str(raw).wrap_err("input is not valid JSON")?;
    let digest = checksum(&document)?;

    Ok(match group {
        Some(group) => format!("{}:{}:{}", config.prefix, group, digest),
        None => digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_does_not_matter() {
        let config = ReuseConfig::default();
        let a = render(r#"{"b": 1, "a": [1, 2]}"#, &config, None).unwrap();
        let b = render(r#"{"a": [1, 2], "b": 1}"#, &config, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_group_renders_cache_key() {
        let config = ReuseConfig::default().with_prefix("registry");
        let key = render(r#"{"schema": "type Query { a: Int }"}"#, &config, Some("compose")).unwrap();
        assert!(key.starts_with("registry:compose:"));
    }

    #[test]
    fn test_invalid_json() {
        assert!(render("{", &ReuseConfig::default(), None).is_err());
    }
}
