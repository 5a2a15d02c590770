//! Typed product specification set
//!
//! Known attributes get their own optional field; anything the parsers find
//! that has no slot lands in `extras`. Detail-page items are always recorded in
//! `extras` under their source label so enrichment can be detected without
//! re-parsing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductSpecs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<String>,
    pub ethernet: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stand_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band_type: Option<String>,
    /// Unstructured detail-page items keyed by their label
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,
}

fn fill<T: Clone>(slot: &mut Option<T>, other: Option<&T>) {
    if slot.is_none() {
        *slot = other.cloned();
    }
}

impl ProductSpecs {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True once detail-page items have been merged in.
    pub fn has_detail_items(&self) -> bool {
        !self.extras.is_empty()
    }

    /// Fill every missing field from `other`. Present values win.
    pub fn merge_missing(&mut self, other: &Self) {
        fill(&mut self.model, other.model.as_ref());
        fill(&mut self.screen_size, other.screen_size.as_ref());
        fill(&mut self.chip, other.chip.as_ref());
        fill(&mut self.cpu_cores, other.cpu_cores.as_ref());
        fill(&mut self.gpu_cores, other.gpu_cores.as_ref());
        fill(&mut self.storage, other.storage.as_ref());
        fill(&mut self.memory, other.memory.as_ref());
        fill(&mut self.color, other.color.as_ref());
        fill(&mut self.connectivity, other.connectivity.as_ref());
        fill(&mut self.display_type, other.display_type.as_ref());
        fill(&mut self.stand_type, other.stand_type.as_ref());
        fill(&mut self.case_size, other.case_size.as_ref());
        fill(&mut self.band_type, other.band_type.as_ref());
        self.ethernet |= other.ethernet;
        for (key, value) in &other.extras {
            self.extras.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    /// Record a labelled detail item, filling the matching typed slot if the
    /// label is recognised.
    pub fn insert_detail(&mut self, label: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let lowered = label.trim().to_lowercase();
        let slot = match lowered.as_str() {
            "chip" | "芯片" | "processor" | "处理器" => Some(&mut self.chip),
            "storage" | "capacity" | "存储容量" | "容量" => Some(&mut self.storage),
            "memory" | "内存" | "统一内存" => Some(&mut self.memory),
            "color" | "colour" | "颜色" | "外观" => Some(&mut self.color),
            "display" | "screen" | "显示屏" => Some(&mut self.screen_size),
            "connectivity" | "network" | "网络" | "无线网络" => Some(&mut self.connectivity),
            "case size" | "表壳尺寸" => Some(&mut self.case_size),
            "band" | "表带" => Some(&mut self.band_type),
            _ => None,
        };
        if let Some(slot) = slot {
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        self.extras.insert(label.trim().to_string(), value.to_string());
    }

    /// Flat, lowercase text of every populated value, used for keyword matching.
    pub fn search_text(&self) -> String {
        let mut parts: Vec<String> = [
            &self.model,
            &self.screen_size,
            &self.chip,
            &self.storage,
            &self.memory,
            &self.color,
            &self.connectivity,
            &self.display_type,
            &self.stand_type,
            &self.case_size,
            &self.band_type,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect();
        if let Some(cores) = self.cpu_cores {
            parts.push(format!("{cores}-core cpu"));
        }
        if let Some(cores) = self.gpu_cores {
            parts.push(format!("{cores}-core gpu"));
        }
        if self.ethernet {
            parts.push("ethernet".to_string());
        }
        parts.extend(self.extras.values().cloned());
        parts.join(" ").to_lowercase()
    }
}
