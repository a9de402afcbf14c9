use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::plan::ContentFormat;

/// Immutable pipeline configuration. Planner and validator receive it
/// explicitly, so planning stays a function of its inputs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VgenConfig {
    #[serde(default)]
    pub system: SystemSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default = "default_platform_catalog")]
    pub platforms: BTreeMap<String, PlatformProfile>,
    #[serde(default)]
    pub buckets: BucketSection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub webhook: WebhookSection,
}

impl Default for VgenConfig {
    fn default() -> Self {
        Self {
            system: SystemSection::default(),
            paths: PathsSection::default(),
            pipeline: PipelineSection::default(),
            platforms: default_platform_catalog(),
            buckets: BucketSection::default(),
            gateway: GatewaySection::default(),
            webhook: WebhookSection::default(),
        }
    }
}

impl VgenConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.data_dir).join(path)
        }
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.jobs_db)
    }

    pub fn platform(&self, name: &str) -> Option<&PlatformProfile> {
        self.platforms.get(name)
    }

    pub fn is_known_platform(&self, name: &str) -> bool {
        self.platforms.contains_key(name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_variants_per_job == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.max_variants_per_job",
                reason: "must be at least 1".into(),
            });
        }
        if self.pipeline.default_variants_per_platform == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.default_variants_per_platform",
                reason: "must be at least 1".into(),
            });
        }
        if !self.pipeline.unit_cost.is_finite() || self.pipeline.unit_cost < 0.0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.unit_cost",
                reason: format!("{} is not a non-negative amount", self.pipeline.unit_cost),
            });
        }
        if self.pipeline.angles.is_empty() {
            return Err(ConfigError::Invalid {
                field: "pipeline.angles",
                reason: "at least one angle is required".into(),
            });
        }
        if self.buckets.weights.iter().all(|weight| *weight == 0) {
            return Err(ConfigError::Invalid {
                field: "buckets.weights",
                reason: "at least one weight must be positive".into(),
            });
        }
        for (name, profile) in &self.platforms {
            if profile.max_length == 0 {
                return Err(ConfigError::Invalid {
                    field: "platforms.max_length",
                    reason: format!("platform {name} has a zero max_length"),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub node_name: String,
    pub environment: String,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            node_name: "vgen-local".into(),
            environment: "development".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub data_dir: String,
    pub jobs_db: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            data_dir: "data".into(),
            jobs_db: "jobs.sqlite".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub config_version: String,
    pub default_seed: u64,
    pub default_platforms: Vec<String>,
    pub default_variants_per_platform: usize,
    pub max_variants_per_job: usize,
    pub unit_cost: f64,
    pub currency: String,
    pub angles: Vec<String>,
    pub fallback_max_length: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            config_version: "v1".into(),
            default_seed: 42,
            default_platforms: vec![
                "instagram".into(),
                "tiktok".into(),
                "x".into(),
                "facebook".into(),
            ],
            default_variants_per_platform: 3,
            max_variants_per_job: 50,
            unit_cost: 0.002,
            currency: "USD".into(),
            angles: vec![
                "benefit".into(),
                "social_proof".into(),
                "urgency".into(),
                "curiosity".into(),
                "story".into(),
                "question".into(),
            ],
            fallback_max_length: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlatformProfile {
    pub max_length: usize,
    pub format: ContentFormat,
    #[serde(default)]
    pub long_form_max_length: Option<usize>,
    #[serde(default)]
    pub required_params: Vec<String>,
}

impl PlatformProfile {
    pub fn new(max_length: usize, format: ContentFormat) -> Self {
        Self {
            max_length,
            format,
            long_form_max_length: None,
            required_params: Vec::new(),
        }
    }

    pub fn with_long_form(mut self, max_length: usize) -> Self {
        self.long_form_max_length = Some(max_length);
        self
    }

    pub fn requiring(mut self, param: &str) -> Self {
        self.required_params.push(param.to_string());
        self
    }
}

pub fn default_platform_catalog() -> BTreeMap<String, PlatformProfile> {
    let mut catalog = BTreeMap::new();
    catalog.insert(
        "instagram".to_string(),
        PlatformProfile::new(2200, ContentFormat::Caption),
    );
    catalog.insert(
        "tiktok".to_string(),
        PlatformProfile::new(300, ContentFormat::ShortVideoScript).with_long_form(2200),
    );
    catalog.insert(
        "x".to_string(),
        PlatformProfile::new(280, ContentFormat::Post).with_long_form(4000),
    );
    catalog.insert(
        "facebook".to_string(),
        PlatformProfile::new(125, ContentFormat::AdCopy).with_long_form(500),
    );
    catalog.insert(
        "linkedin".to_string(),
        PlatformProfile::new(700, ContentFormat::Post)
            .with_long_form(3000)
            .requiring("audience"),
    );
    catalog.insert(
        "youtube".to_string(),
        PlatformProfile::new(100, ContentFormat::Headline),
    );
    catalog
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BucketSection {
    pub default_max_chars: usize,
    pub default_total: usize,
    pub weights: [u32; 3],
}

impl Default for BucketSection {
    fn default() -> Self {
        Self {
            default_max_chars: 150,
            default_total: 20,
            weights: [1, 1, 1],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub endpoint: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "default".into(),
            timeout_ms: 20_000,
        }
    }
}

impl GatewaySection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookSection {
    pub timeout_ms: u64,
    pub secret: Option<String>,
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            secret: None,
        }
    }
}

impl WebhookSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

pub fn load_vgen_config<P: AsRef<Path>>(path: P) -> Result<VgenConfig> {
    let config: VgenConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/vgen.toml");
        let config = load_vgen_config(path).expect("config should parse");
        assert_eq!(config.system.node_name, "vgen-primary");
        assert_eq!(config.pipeline.default_seed, 42);
        assert_eq!(config.buckets.default_max_chars, 150);
        assert_eq!(config.buckets.default_total, 20);
        let linkedin = config.platform("linkedin").unwrap();
        assert_eq!(linkedin.required_params, vec!["audience".to_string()]);
        assert_eq!(config.platform("x").unwrap().format, ContentFormat::Post);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: VgenConfig = toml::from_str("[system]\nnode_name = \"n\"\nenvironment = \"test\"\n").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.max_variants_per_job, 50);
        assert!(config.is_known_platform("instagram"));
        assert_eq!(config.jobs_db_path(), PathBuf::from("data/jobs.sqlite"));
    }

    #[test]
    fn zero_ceiling_is_rejected() {
        let mut config = VgenConfig::default();
        config.pipeline.max_variants_per_job = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "pipeline.max_variants_per_job",
                ..
            })
        ));
    }
}
