use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::name::{AssetName, VariantTag};

/// One variant to fetch: its tag and where the fetcher should look.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub tag: VariantTag,
    pub locator: String,
}

impl VariantSpec {
    pub fn new(tag: VariantTag, locator: impl Into<String>) -> Self {
        Self {
            tag,
            locator: locator.into(),
        }
    }
}

/// The full set of variants an asset is made of.
///
/// A plan is non-empty and lists each tag at most once. The orchestrator
/// fetches every entry concurrently and persists only when all succeed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FetchPlan {
    variants: Vec<VariantSpec>,
}

impl FetchPlan {
    pub fn new(variants: Vec<VariantSpec>) -> Result<Self, TypeError> {
        if variants.is_empty() {
            return Err(TypeError::EmptyPlan);
        }
        let mut seen = BTreeSet::new();
        for spec in &variants {
            if !seen.insert(&spec.tag) {
                return Err(TypeError::DuplicateVariant(spec.tag.to_string()));
            }
        }
        Ok(Self { variants })
    }

    pub fn variants(&self) -> &[VariantSpec] {
        &self.variants
    }

    pub fn tags(&self) -> impl Iterator<Item = &VariantTag> {
        self.variants.iter().map(|v| &v.tag)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

/// Locator pattern such as `videos/{name}.{tag}`.
///
/// `{name}` expands to the asset name and `{tag}` to the variant tag. The
/// pattern must mention `{name}`, otherwise every asset would share one
/// locator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorTemplate {
    pub tag: VariantTag,
    pub pattern: String,
}

impl LocatorTemplate {
    pub fn new(tag: VariantTag, pattern: impl Into<String>) -> Result<Self, TypeError> {
        let pattern = pattern.into();
        if !pattern.contains("{name}") {
            return Err(TypeError::InvalidTemplate {
                template: pattern,
                reason: "missing {name} placeholder",
            });
        }
        Ok(Self { tag, pattern })
    }

    pub fn expand(&self, name: &AssetName) -> VariantSpec {
        let locator = self
            .pattern
            .replace("{name}", name.as_str())
            .replace("{tag}", self.tag.as_str());
        VariantSpec::new(self.tag.clone(), locator)
    }

    /// Build a plan for `name` from a set of templates.
    pub fn plan_for(templates: &[LocatorTemplate], name: &AssetName) -> Result<FetchPlan, TypeError> {
        FetchPlan::new(templates.iter().map(|t| t.expand(name)).collect())
    }

    /// The `videos/{name}.mp4` + `videos/{name}.webm` pair.
    pub fn video_pair() -> Vec<LocatorTemplate> {
        vec![
            Self {
                tag: VariantTag::mp4(),
                pattern: "videos/{name}.{tag}".into(),
            },
            Self {
                tag: VariantTag::webm(),
                pattern: "videos/{name}.{tag}".into(),
            },
        ]
    }
}
