//! Theme parser

use quarry_core::ResourceKind;
use quarry_core::spec::{Color, ThemeSpec};
use quarry_core::yaml::scalar_to_string;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use super::{ParseContext, decode, reject_sql_and_connector};
use crate::error::{Error, Result};
use crate::node::Node;

const NAMED_COLORS: [(&str, [u8; 3]); 16] = [
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("red", [255, 0, 0]),
    ("green", [0, 128, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("orange", [255, 165, 0]),
    ("purple", [128, 0, 128]),
    ("pink", [255, 192, 203]),
    ("gray", [128, 128, 128]),
    ("grey", [128, 128, 128]),
    ("navy", [0, 0, 128]),
    ("teal", [0, 128, 128]),
    ("olive", [128, 128, 0]),
    ("maroon", [128, 0, 0]),
    ("silver", [192, 192, 192]),
];

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ThemeYaml {
    #[serde(default)]
    colors: Option<ColorsYaml>,
    #[serde(default)]
    primary_color: Option<String>,
    #[serde(default)]
    secondary_color: Option<String>,
    #[serde(default)]
    css: Option<String>,
    #[serde(default)]
    light: Option<Mapping>,
    #[serde(default)]
    dark: Option<Mapping>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ColorsYaml {
    #[serde(default)]
    primary: Option<String>,
    #[serde(default)]
    secondary: Option<String>,
}

impl ThemeYaml {
    /// Validate colors and build the spec
    pub fn to_spec(&self) -> Result<ThemeSpec> {
        let colors = self.colors.as_ref();
        let primary = colors
            .and_then(|c| c.primary.clone())
            .or_else(|| self.primary_color.clone());
        let secondary = colors
            .and_then(|c| c.secondary.clone())
            .or_else(|| self.secondary_color.clone());

        let mut spec = ThemeSpec::default();
        if let Some(raw) = primary {
            spec.primary_color = Some(parse_color(&raw)?);
            spec.primary_color_raw = raw;
        }
        if let Some(raw) = secondary {
            spec.secondary_color = Some(parse_color(&raw)?);
            spec.secondary_color_raw = raw;
        }

        let mut css = self.css.clone().unwrap_or_default();
        for (selector, block) in [(":root", &self.light), (".dark", &self.dark)] {
            if let Some(block) = block {
                css.push_str(&css_block(selector, block)?);
            }
        }
        spec.css = css;
        Ok(spec)
    }
}

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    reject_sql_and_connector(node)?;
    let yaml: ThemeYaml = decode(&node.yaml)?;
    let spec = yaml.to_spec()?;

    let resource = ctx.registry.insert(ResourceKind::Theme, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    if let Some(theme) = resource.spec.as_theme_mut() {
        *theme = spec;
    }
    Ok(())
}

/// `theme:` key of an explore or canvas: a theme name or an inline theme
pub(crate) fn theme_ref(value: &Value) -> Result<(String, Option<ThemeSpec>)> {
    match value {
        Value::String(name) => Ok((name.clone(), None)),
        Value::Mapping(map) => {
            let yaml: ThemeYaml = decode(map)?;
            Ok((String::new(), Some(yaml.to_spec()?)))
        }
        _ => Err(Error::invalid("theme must be a theme name or an inline theme")),
    }
}

fn css_block(selector: &str, vars: &Mapping) -> Result<String> {
    let mut out = format!("{selector} {{\n");
    for (key, value) in vars {
        let (Some(key), Some(value)) = (key.as_str(), scalar_to_string(value)) else {
            return Err(Error::invalid(format!(
                "theme variables under {selector} must be scalar"
            )));
        };
        out.push_str(&format!("  --{key}: {value};\n"));
    }
    out.push_str("}\n");
    Ok(out)
}

/// Parse a CSS color name or a hex color (`#rgb`, `#rrggbb`, `#rrggbbaa`)
pub(crate) fn parse_color(s: &str) -> Result<Color> {
    let trimmed = s.trim();
    let invalid = || Error::invalid(format!("invalid color {s:?}"));

    if let Some(hex) = trimmed.strip_prefix('#') {
        let expanded: String = if hex.len() == 3 {
            hex.chars().flat_map(|c| [c, c]).collect()
        } else {
            hex.to_string()
        };
        if !matches!(expanded.len(), 6 | 8) || !expanded.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |i: usize| -> Result<f32> {
            u8::from_str_radix(&expanded[i..i + 2], 16)
                .map(|v| f32::from(v) / 255.0)
                .map_err(|_| invalid())
        };
        let alpha = if expanded.len() == 8 { channel(6)? } else { 1.0 };
        return Ok(Color {
            red: channel(0)?,
            green: channel(2)?,
            blue: channel(4)?,
            alpha,
        });
    }

    let lower = trimmed.to_lowercase();
    NAMED_COLORS
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, [r, g, b])| Color {
            red: f32::from(*r) / 255.0,
            green: f32::from(*g) / 255.0,
            blue: f32::from(*b) / 255.0,
            alpha: 1.0,
        })
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::parse_files;
    use quarry_core::ResourceName;
    use rstest::rstest;

    #[rstest]
    #[case("#ff0000", 1.0, 0.0, 0.0, 1.0)]
    #[case("#0f0", 0.0, 1.0, 0.0, 1.0)]
    #[case("#0000ff80", 0.0, 0.0, 1.0, 128.0 / 255.0)]
    #[case("White", 1.0, 1.0, 1.0, 1.0)]
    fn test_parse_color(#[case] s: &str, #[case] r: f32, #[case] g: f32, #[case] b: f32, #[case] a: f32) {
        let c = parse_color(s).unwrap();
        assert_eq!((c.red, c.green, c.blue, c.alpha), (r, g, b, a));
    }

    #[rstest]
    #[case("#12")]
    #[case("#gggggg")]
    #[case("chartreuse-ish")]
    fn test_invalid_color(#[case] s: &str) {
        assert!(parse_color(s).is_err());
    }

    #[test]
    fn test_theme_resource() {
        let parser = parse_files(&[(
            "/themes/brand.yaml",
            r##"
type: theme
colors:
  primary: "#336699"
secondary_color: navy
light:
  surface: "#ffffff"
"##,
        )]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        let theme = parser
            .resource(&ResourceName::new(ResourceKind::Theme, "brand"))
            .unwrap()
            .spec
            .as_theme()
            .unwrap()
            .clone();
        assert_eq!(theme.primary_color_raw, "#336699");
        assert_eq!(theme.secondary_color_raw, "navy");
        assert!(theme.css.contains("--surface: #ffffff;"));
    }
}
