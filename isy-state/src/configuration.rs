//! Controller configuration: firmware, uuid, installed feature modules

use serde::{Deserialize, Serialize};

use isy_stream::xml::{self, find_all, find_element, value_from_xml};

use crate::error::Result;

const TAG_FIRMWARE: &str = "app_full_version";
const TAG_ROOT: &str = "root";
const TAG_FEATURE: &str = "feature";
const TAG_ID: &str = "id";
const TAG_DESC: &str = "desc";
const TAG_INSTALLED: &str = "isInstalled";

/// An optional controller module such as "Networking Module"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub description: String,
    pub installed: bool,
}

/// Parsed controller configuration document.
///
/// Features can be looked up by numeric id or by description:
///
/// ```rust
/// use isy_state::Configuration;
///
/// let config = Configuration::parse(
///     "<configuration><app_full_version>5.3.4</app_full_version>\
///      <root><id>00:21:b9:02:11:ab</id></root>\
///      <features><feature><id>21040</id><desc>Networking Module</desc>\
///      <isInstalled>true</isInstalled></feature></features></configuration>",
/// )?;
///
/// assert!(config.is_installed("21040"));
/// assert!(config.is_installed("Networking Module"));
/// # Ok::<(), isy_state::StateError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub firmware: Option<String>,
    pub uuid: Option<String>,
    features: Vec<Feature>,
}

impl Configuration {
    pub fn parse(text: &str) -> Result<Self> {
        let doc = xml::parse(text)?;

        let uuid = find_element(&doc, TAG_ROOT).and_then(|root| value_from_xml(root, TAG_ID));
        let features = find_all(&doc, TAG_FEATURE)
            .into_iter()
            .map(|feature| Feature {
                id: value_from_xml(feature, TAG_ID).unwrap_or_default(),
                description: value_from_xml(feature, TAG_DESC).unwrap_or_default(),
                installed: value_from_xml(feature, TAG_INSTALLED).as_deref() == Some("true"),
            })
            .collect::<Vec<_>>();

        let config = Self {
            firmware: value_from_xml(&doc, TAG_FIRMWARE),
            uuid,
            features,
        };
        tracing::info!(
            firmware = ?config.firmware,
            features = config.features.len(),
            "Loaded controller configuration"
        );
        Ok(config)
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Feature by id or description
    pub fn feature(&self, key: &str) -> Option<&Feature> {
        self.features
            .iter()
            .find(|feature| feature.id == key || feature.description == key)
    }

    /// Whether the feature named by id or description is installed
    pub fn is_installed(&self, key: &str) -> bool {
        self.feature(key).is_some_and(|feature| feature.installed)
    }
}
