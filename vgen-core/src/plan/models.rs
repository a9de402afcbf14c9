use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::PipelineSection;

/// Feature flag that switches platforms to their long-form length limit.
pub const LONG_FORM_FLAG: &str = "long_form";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    Caption,
    ShortVideoScript,
    Post,
    Thread,
    Headline,
    AdCopy,
    Plain,
}

impl ContentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentFormat::Caption => "caption",
            ContentFormat::ShortVideoScript => "short_video_script",
            ContentFormat::Post => "post",
            ContentFormat::Thread => "thread",
            ContentFormat::Headline => "headline",
            ContentFormat::AdCopy => "ad_copy",
            ContentFormat::Plain => "plain",
        }
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LengthBucket {
    Short,
    Medium,
    Long,
}

impl LengthBucket {
    pub const ALL: [LengthBucket; 3] = [LengthBucket::Short, LengthBucket::Medium, LengthBucket::Long];

    pub fn as_str(&self) -> &'static str {
        match self {
            LengthBucket::Short => "short",
            LengthBucket::Medium => "medium",
            LengthBucket::Long => "long",
        }
    }
}

impl fmt::Display for LengthBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LengthBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" => Ok(LengthBucket::Short),
            "medium" => Ok(LengthBucket::Medium),
            "long" => Ok(LengthBucket::Long),
            other => Err(format!("unknown length bucket: {other}")),
        }
    }
}

/// What a variant is written for: a publishing platform or a length class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum VariantTarget {
    Platform(String),
    Bucket(LengthBucket),
}

impl VariantTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            VariantTarget::Platform(_) => "platform",
            VariantTarget::Bucket(_) => "bucket",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VariantTarget::Platform(name) => name.as_str(),
            VariantTarget::Bucket(bucket) => bucket.as_str(),
        }
    }

    pub fn from_parts(kind: &str, name: &str) -> Option<Self> {
        match kind {
            "platform" => Some(VariantTarget::Platform(name.to_string())),
            "bucket" => name.parse().ok().map(VariantTarget::Bucket),
            _ => None,
        }
    }
}

impl fmt::Display for VariantTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `(target, slot_index)`: the identity of one planned variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub target: VariantTarget,
    pub slot_index: usize,
}

impl SlotKey {
    pub fn new(target: VariantTarget, slot_index: usize) -> Self {
        Self { target, slot_index }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.target, self.slot_index)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constraints {
    pub max_length: usize,
    pub format: ContentFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantSpec {
    pub target: VariantTarget,
    pub slot_index: usize,
    pub constraints: Constraints,
    #[serde(default)]
    pub prompt_params: BTreeMap<String, String>,
}

impl VariantSpec {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.target.clone(), self.slot_index)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.prompt_params.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BrandIdentity {
    pub name: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub call_to_action: Option<String>,
}

impl BrandIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SourceAsset {
    pub reference: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl SourceAsset {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            description: None,
        }
    }
}

/// Fully-formed business input for the platform planner. Absent fields
/// resolve to configured defaults at planning time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanRequest {
    pub brand: BrandIdentity,
    pub source_asset: SourceAsset,
    #[serde(default)]
    pub platforms: Option<Vec<String>>,
    #[serde(default)]
    pub variants_per_platform: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub feature_flags: BTreeSet<String>,
}

impl PlanRequest {
    pub fn new(brand: BrandIdentity, source_asset: SourceAsset) -> Self {
        Self {
            brand,
            source_asset,
            platforms: None,
            variants_per_platform: None,
            seed: None,
            feature_flags: BTreeSet::new(),
        }
    }

    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms = Some(platforms.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_variants_per_platform(mut self, count: usize) -> Self {
        self.variants_per_platform = Some(count);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.feature_flags.insert(flag.into());
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.feature_flags.contains(flag)
    }
}

/// Input for the length-bucket planner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LengthVariantRequest {
    pub content: String,
    #[serde(default)]
    pub max_chars: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub total_variants: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostEstimate {
    pub unit_cost: f64,
    pub variant_count: usize,
    pub total: f64,
    pub currency: String,
}

impl CostEstimate {
    pub fn for_variants(pipeline: &PipelineSection, variant_count: usize) -> Self {
        Self {
            unit_cost: pipeline.unit_cost,
            variant_count,
            total: pipeline.unit_cost * variant_count as f64,
            currency: pipeline.currency.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub plan_id: String,
    pub seed: u64,
    pub config_version: String,
    pub variants: Vec<VariantSpec>,
    pub cost: CostEstimate,
}

impl Plan {
    /// Builds a plan whose id is a digest of its seed, config version and
    /// variant sequence, so identical inputs produce identical ids.
    pub fn assemble(
        seed: u64,
        config_version: impl Into<String>,
        variants: Vec<VariantSpec>,
        cost: CostEstimate,
    ) -> Self {
        let config_version = config_version.into();
        let plan_id = plan_digest(seed, &config_version, &variants);
        Self {
            plan_id,
            seed,
            config_version,
            variants,
            cost,
        }
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn position_of(&self, key: &SlotKey) -> Option<usize> {
        self.variants
            .iter()
            .position(|spec| spec.slot_index == key.slot_index && spec.target == key.target)
    }

    pub fn targets(&self) -> Vec<&VariantTarget> {
        let mut seen = Vec::new();
        for spec in &self.variants {
            if !seen.contains(&&spec.target) {
                seen.push(&spec.target);
            }
        }
        seen
    }
}

fn plan_digest(seed: u64, config_version: &str, variants: &[VariantSpec]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(config_version.as_bytes());
    for spec in variants {
        hasher.update([0u8]);
        hasher.update(spec.target.kind().as_bytes());
        hasher.update(spec.target.name().as_bytes());
        hasher.update((spec.slot_index as u64).to_le_bytes());
        hasher.update((spec.constraints.max_length as u64).to_le_bytes());
        hasher.update(spec.constraints.format.as_str().as_bytes());
        for (key, value) in &spec.prompt_params {
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
            hasher.update([b';']);
        }
    }
    let digest = hex::encode(hasher.finalize());
    format!("pl-{}", &digest[..16])
}
