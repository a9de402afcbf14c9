pub mod buckets;
pub mod models;
pub mod planner;
pub mod validator;

pub use buckets::{bucket_limits, split_total, LengthBucketPlanner};
pub use models::{
    BrandIdentity, Constraints, ContentFormat, CostEstimate, LengthBucket, LengthVariantRequest,
    Plan, PlanRequest, SlotKey, SourceAsset, VariantSpec, VariantTarget, LONG_FORM_FLAG,
};
pub use planner::Planner;
pub use validator::{ValidationIssue, ValidationResult, Validator};
