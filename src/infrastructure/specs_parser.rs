//! Typed specs from a catalog listing title
//!
//! Titles mix Chinese and English ("翻新 13 英寸 MacBook Air Apple M2 芯片
//! (8 核中央处理器和 8 核图形处理器) - 午夜色"). Each field is looked up
//! independently; anything not recognised stays `None`.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;

use crate::domain::ProductSpecs;

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .inspect_err(|e| error!("Invalid specs pattern {}: {}", pattern, e))
        .ok()
}

static SCREEN_SIZE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r#"(?i)(\d+(?:\.\d+)?)\s*(?:英寸|寸|-inch|inch|")"#));
static CHIP: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)\b(M[1-4])(?:\s*(Max|Pro|Ultra))?\s*(?:芯片|chip)"));
static CPU_CORES: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)(\d+)\s*(?:核|-core)\s*(?:中央处理器|CPU)"));
static GPU_CORES: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)(\d+)\s*(?:核|-core)\s*(?:图形处理器|GPU)"));
static STORAGE_EXPLICIT: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)(\d+)\s*(GB|TB)\s*(?:固态硬盘|存储|硬盘|SSD|storage)"));
static STORAGE_AFTER_DASH: Lazy<Option<Regex>> = Lazy::new(|| compile(r"(?i)-\s*(\d+)\s*(GB|TB)"));
static CAPACITY: Lazy<Option<Regex>> = Lazy::new(|| compile(r"(?i)(\d+)\s*(GB|TB)"));
static MEMORY: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?i)(\d+)\s*GB\s*(?:统一内存|内存|unified memory|memory|RAM)"));
static CASE_SIZE: Lazy<Option<Regex>> = Lazy::new(|| compile(r"(?i)(\d+)\s*(?:毫米|mm)"));

const VALID_STORAGE_GB: &[u32] = &[16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192];

/// Checked in order; more specific names first.
const MODELS: &[(&str, &str)] = &[
    ("macbook pro", "MacBook Pro"),
    ("macbook air", "MacBook Air"),
    ("mac mini", "Mac mini"),
    ("mac studio", "Mac Studio"),
    ("imac", "iMac"),
    ("studio display", "Studio Display"),
    ("pro display", "Pro Display"),
    ("ipad pro", "iPad Pro"),
    ("ipad air", "iPad Air"),
    ("ipad mini", "iPad mini"),
    ("ipad", "iPad"),
    ("apple watch se", "Apple Watch SE"),
    ("apple watch ultra", "Apple Watch Ultra"),
    ("apple watch", "Apple Watch"),
    ("airpods pro", "AirPods Pro"),
    ("airpods max", "AirPods Max"),
    ("airpods", "AirPods"),
    ("homepod mini", "HomePod mini"),
    ("homepod", "HomePod"),
];

const COLORS: &[(&str, &str)] = &[
    ("深空灰色", "深空灰"),
    ("深空黑色", "深空黑"),
    ("深空黑", "深空黑"),
    ("玫瑰金色", "玫瑰金"),
    ("星光色", "星光色"),
    ("午夜色", "午夜色"),
    ("银色", "银色"),
    ("金色", "金色"),
    ("绿色", "绿色"),
    ("蓝色", "蓝色"),
    ("紫色", "紫色"),
    ("红色", "红色"),
    ("橙色", "橙色"),
    ("黄色", "黄色"),
    ("粉色", "粉色"),
    ("黑色", "黑色"),
    ("白色", "白色"),
    ("space grey", "深空灰"),
    ("space gray", "深空灰"),
    ("space black", "深空黑"),
    ("starlight", "星光色"),
    ("midnight", "午夜色"),
    ("silver", "银色"),
    ("gold", "金色"),
    ("pink", "粉色"),
    ("orange", "橙色"),
    ("blue", "蓝色"),
    ("purple", "紫色"),
    ("green", "绿色"),
];

const BANDS: &[(&[&str], &str)] = &[
    (&["运动型表带", "运动表带", "sport band"], "运动型表带"),
    (&["回环式表带", "sport loop"], "回环式表带"),
    (&["米兰尼斯表带", "米兰表带", "milanese"], "米兰尼斯表带"),
    (&["皮革表带", "leather"], "皮革表带"),
    (&["链式表带", "link bracelet"], "链式表带"),
    (&["编织表带", "braided"], "编织表带"),
];

/// Parse everything recognisable out of a listing title.
pub fn parse_title_specs(name: &str) -> ProductSpecs {
    let lower = name.to_lowercase();
    let (chip, cpu_cores, gpu_cores) = parse_chip(name);
    let is_watch = lower.contains("watch");

    ProductSpecs {
        model: parse_model(&lower),
        screen_size: parse_screen_size(name),
        chip,
        cpu_cores,
        gpu_cores,
        storage: parse_storage(name),
        memory: parse_memory(name),
        color: lookup(&lower, COLORS),
        connectivity: parse_connectivity(name),
        ethernet: name.contains("千兆以太网") || lower.contains("gigabit") || lower.contains("ethernet"),
        display_type: parse_display_type(name, &lower),
        stand_type: parse_stand_type(name, &lower),
        case_size: if is_watch { parse_case_size(name) } else { None },
        band_type: if is_watch { parse_band(&lower) } else { None },
        ..ProductSpecs::default()
    }
}

fn lookup(lower: &str, table: &[(&str, &str)]) -> Option<String> {
    table
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, label)| (*label).to_string())
}

fn parse_model(lower: &str) -> Option<String> {
    lookup(lower, MODELS)
}

fn parse_screen_size(name: &str) -> Option<String> {
    let caps = SCREEN_SIZE.as_ref()?.captures(name)?;
    Some(format!("{}英寸", &caps[1]))
}

fn parse_chip(name: &str) -> (Option<String>, Option<u32>, Option<u32>) {
    let chip = CHIP.as_ref().and_then(|re| re.captures(name)).map(|caps| {
        let family = caps[1].to_uppercase();
        match caps.get(2) {
            Some(variant) => format!("{family} {}", capitalize(variant.as_str())),
            None => family,
        }
    });
    let cores = |re: &Lazy<Option<Regex>>| {
        re.as_ref()
            .and_then(|re| re.captures(name))
            .and_then(|caps| caps[1].parse::<u32>().ok())
    };
    (chip, cores(&CPU_CORES), cores(&GPU_CORES))
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

fn format_storage(size: u32, unit: &str) -> String {
    if unit.eq_ignore_ascii_case("GB") && size >= 1024 {
        format!("{}TB", size / 1024)
    } else {
        format!("{size}{}", unit.to_uppercase())
    }
}

fn parse_storage(name: &str) -> Option<String> {
    for re in [&STORAGE_EXPLICIT, &STORAGE_AFTER_DASH] {
        if let Some(caps) = re.as_ref().and_then(|re| re.captures(name)) {
            if let Ok(size) = caps[1].parse::<u32>() {
                return Some(format_storage(size, &caps[2]));
            }
        }
    }

    // Fall back to the first plausible capacity that is not a memory size.
    let capacity = CAPACITY.as_ref()?;
    for caps in capacity.captures_iter(name) {
        let (Some(whole), Ok(size)) = (caps.get(0), caps[1].parse::<u32>()) else {
            continue;
        };
        let after = name[whole.end()..].trim_start().to_lowercase();
        if ["统一内存", "内存", "unified", "memory", "ram", "核", "core"]
            .iter()
            .any(|suffix| after.starts_with(suffix))
        {
            continue;
        }
        let in_gb = if caps[2].eq_ignore_ascii_case("TB") { size * 1024 } else { size };
        if VALID_STORAGE_GB.contains(&in_gb) {
            return Some(format_storage(size, &caps[2]));
        }
    }
    None
}

fn parse_memory(name: &str) -> Option<String> {
    let caps = MEMORY.as_ref()?.captures(name)?;
    Some(format!("{}GB", &caps[1]))
}

fn parse_connectivity(name: &str) -> Option<String> {
    let cellular = name.contains("蜂窝网络") || name.contains("Cellular");
    let label = if name.contains("Wi-Fi") && cellular {
        "Wi-Fi + 蜂窝网络"
    } else if name.contains("Wi-Fi") || name.contains("WLAN") {
        "Wi-Fi"
    } else if name.contains("GPS") && cellular {
        "GPS + 蜂窝网络"
    } else if name.contains("GPS") {
        "GPS"
    } else {
        return None;
    };
    Some(label.to_string())
}

fn parse_display_type(name: &str, lower: &str) -> Option<String> {
    if name.contains("纳米纹理") || lower.contains("nano-texture") {
        Some("纳米纹理玻璃".into())
    } else if name.contains("标准玻璃") || lower.contains("standard glass") {
        Some("标准玻璃".into())
    } else {
        None
    }
}

fn parse_stand_type(name: &str, lower: &str) -> Option<String> {
    if name.contains("可调倾斜度") || lower.contains("tilt") {
        Some("可调节支架".into())
    } else if lower.contains("vesa") {
        Some("VESA 支架".into())
    } else {
        None
    }
}

fn parse_case_size(name: &str) -> Option<String> {
    let caps = CASE_SIZE.as_ref()?.captures(name)?;
    Some(format!("{}毫米", &caps[1]))
}

fn parse_band(lower: &str) -> Option<String> {
    BANDS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
        .map(|(_, label)| (*label).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_macbook_title() {
        let specs = parse_title_specs(
            "13 英寸 MacBook Air Apple M2 芯片 (8 核中央处理器和 10 核图形处理器) - 16GB 统一内存 - 512GB 固态硬盘 - 午夜色",
        );
        assert_eq!(specs.model.as_deref(), Some("MacBook Air"));
        assert_eq!(specs.screen_size.as_deref(), Some("13英寸"));
        assert_eq!(specs.chip.as_deref(), Some("M2"));
        assert_eq!(specs.cpu_cores, Some(8));
        assert_eq!(specs.gpu_cores, Some(10));
        assert_eq!(specs.memory.as_deref(), Some("16GB"));
        assert_eq!(specs.storage.as_deref(), Some("512GB"));
        assert_eq!(specs.color.as_deref(), Some("午夜色"));
        assert!(specs.case_size.is_none());
    }

    #[test]
    fn parses_pro_chip_variant() {
        let specs = parse_title_specs("14 英寸 MacBook Pro Apple M3 Pro 芯片 - 1TB 固态硬盘 - 深空黑色");
        assert_eq!(specs.chip.as_deref(), Some("M3 Pro"));
        assert_eq!(specs.storage.as_deref(), Some("1TB"));
        assert_eq!(specs.color.as_deref(), Some("深空黑"));
    }

    #[test]
    fn memory_is_not_mistaken_for_storage() {
        let specs = parse_title_specs("Mac mini Apple M2 芯片 16GB 内存 256GB");
        assert_eq!(specs.memory.as_deref(), Some("16GB"));
        assert_eq!(specs.storage.as_deref(), Some("256GB"));
    }

    #[rstest]
    #[case("iPad Pro 11 英寸 Wi-Fi 256GB", "iPad Pro")]
    #[case("iPad mini Wi-Fi + 蜂窝网络 64GB", "iPad mini")]
    #[case("iPad Wi-Fi 64GB - 银色", "iPad")]
    #[case("Apple Watch Series 9 GPS 45 毫米", "Apple Watch")]
    #[case("Apple Watch Ultra 2 GPS + Cellular", "Apple Watch Ultra")]
    #[case("AirPods Pro (第二代)", "AirPods Pro")]
    #[case("HomePod mini - 白色", "HomePod mini")]
    #[case("Studio Display - 纳米纹理玻璃", "Studio Display")]
    fn detects_model(#[case] title: &str, #[case] model: &str) {
        assert_eq!(parse_title_specs(title).model.as_deref(), Some(model));
    }

    #[test]
    fn watch_fields_only_for_watches() {
        let watch = parse_title_specs("Apple Watch SE GPS 44 毫米 星光色铝金属表壳 运动型表带");
        assert_eq!(watch.case_size.as_deref(), Some("44毫米"));
        assert_eq!(watch.band_type.as_deref(), Some("运动型表带"));
        assert_eq!(watch.connectivity.as_deref(), Some("GPS"));

        let display = parse_title_specs("Studio Display - 纳米纹理玻璃 - 可调倾斜度及高度的支架");
        assert_eq!(display.display_type.as_deref(), Some("纳米纹理玻璃"));
        assert_eq!(display.stand_type.as_deref(), Some("可调节支架"));
        assert!(display.case_size.is_none());
    }

    #[test]
    fn unrecognised_title_is_empty() {
        assert!(parse_title_specs("Magic Keyboard").is_empty());
    }
}
