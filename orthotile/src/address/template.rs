//! URL templates and token substitution.
//!
//! # Tokens
//!
//! | Protocol | Tokens |
//! |----------|--------|
//! | WMTS | `{layer}` `{style}` `{format}` `{TileMatrixSet}` `{TileMatrix}` `{TileRow}` `{TileCol}` + dimension identifiers |
//! | WMS | `{proj}` `{wkid}` `{bbox}` `{w}` `{s}` `{e}` `{n}` `{width}` `{height}` |
//! | TMS | `{zoom}` `{z}` `{x}` `{y}` `{-y}` |
//!
//! Token names are matched case-insensitively. A `{header(name,value)}`
//! token is removed from the URL and sent as a request header instead.

use std::fmt;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use thiserror::Error;

use crate::capabilities::Dimension;
use crate::projection::ProjectionBounds;

const WMTS_TOKENS: &[&str] = &[
    "layer",
    "style",
    "format",
    "tilematrixset",
    "tilematrix",
    "tilerow",
    "tilecol",
];

const WMS_TOKENS: &[&str] = &["proj", "wkid", "bbox", "w", "s", "e", "n", "width", "height"];

/// Protocol family of a tile source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Wmts,
    Wms,
    Tms,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Wmts, SourceKind::Wms, SourceKind::Tms];
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Wmts => write!(f, "WMTS"),
            SourceKind::Wms => write!(f, "WMS"),
            SourceKind::Tms => write!(f, "TMS"),
        }
    }
}

/// Errors raised while validating templates or addressing tiles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Template uses a token the protocol does not define.
    #[error("Unknown token {{{token}}} in {kind} template '{template}'")]
    UnknownToken {
        token: String,
        kind: SourceKind,
        template: String,
    },

    /// Tile position outside the declared matrix extent.
    #[error("Tile {x}/{y} is outside the {x_max}x{y_max} grid at zoom {zoom}")]
    OutOfRange {
        x: u32,
        y: u32,
        zoom: u8,
        x_max: u32,
        y_max: u32,
    },

    /// Zoom deeper than the matrix set.
    #[error("Zoom {zoom} is beyond the deepest level {max_zoom}")]
    ZoomOutOfRange { zoom: u8, max_zoom: u8 },

    /// REST access to a layer that declared no tile `ResourceURL`.
    #[error("Layer '{0}' has no REST tile template")]
    MissingTemplate(String),
}

/// Values available for substitution into a template.
#[derive(Debug, Clone, Default)]
pub struct TileParameters<'a> {
    pub layer: &'a str,
    pub style: &'a str,
    pub format: &'a str,
    pub matrix_set: &'a str,
    pub matrix: &'a str,
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
    /// Number of rows at this zoom, for the flipped `{-y}` token.
    pub rows: u32,
    pub tile_size: u32,
    pub projection_code: &'a str,
    pub bbox: Option<ProjectionBounds>,
    /// Emit `{bbox}` as south,west,north,east (WMS 1.3.0 lat/lon CRSes).
    pub bbox_lat_first: bool,
    pub dimensions: &'a [Dimension],
}

/// A URL template with its embedded header tokens split off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
    headers: Vec<(String, String)>,
}

impl UrlTemplate {
    /// Parses a raw template, extracting `{header(name,value)}` tokens.
    ///
    /// # Example
    ///
    /// ```
    /// use orthotile::address::UrlTemplate;
    ///
    /// let t = UrlTemplate::parse("https://example.com/{z}/{x}/{y}.png{header(X-Api-Key,secret)}");
    /// assert_eq!(t.as_str(), "https://example.com/{z}/{x}/{y}.png");
    /// assert_eq!(t.headers(), &[("X-Api-Key".to_string(), "secret".to_string())]);
    /// ```
    pub fn parse(raw: &str) -> Self {
        let headers = header_pattern()
            .captures_iter(raw)
            .map(|c| (c[1].trim().to_string(), c[2].trim().to_string()))
            .collect();
        let template = header_pattern().replace_all(raw, "").into_owned();

        Self { template, headers }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Headers extracted from the template.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Token names in order of appearance, without braces.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        token_pattern()
            .captures_iter(&self.template)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
    }

    /// Rejects tokens the protocol does not define.
    ///
    /// `extra_tokens` are accepted in addition to the protocol's own (WMTS
    /// dimension identifiers). TMS templates are not restricted.
    ///
    /// # Errors
    ///
    /// [`AddressError::UnknownToken`] for the first unrecognised token.
    pub fn validate(&self, kind: SourceKind, extra_tokens: &[&str]) -> Result<(), AddressError> {
        let known: &[&str] = match kind {
            SourceKind::Wmts => WMTS_TOKENS,
            SourceKind::Wms => WMS_TOKENS,
            SourceKind::Tms => return Ok(()),
        };

        for token in self.tokens() {
            let recognised = known.iter().any(|k| k.eq_ignore_ascii_case(token))
                || extra_tokens.iter().any(|k| k.eq_ignore_ascii_case(token));
            if !recognised {
                return Err(AddressError::UnknownToken {
                    token: token.to_string(),
                    kind,
                    template: self.template.clone(),
                });
            }
        }
        Ok(())
    }

    /// Substitutes every recognised token. Unknown tokens stay verbatim.
    pub fn expand(&self, params: &TileParameters<'_>) -> String {
        token_pattern()
            .replace_all(&self.template, |caps: &Captures<'_>| {
                substitute(&caps[1], params).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

fn substitute(token: &str, p: &TileParameters<'_>) -> Option<String> {
    let value = match token.to_ascii_lowercase().as_str() {
        "layer" => p.layer.to_string(),
        "style" => p.style.to_string(),
        "format" => p.format.to_string(),
        "tilematrixset" => p.matrix_set.to_string(),
        "tilematrix" => p.matrix.to_string(),
        "tilerow" | "y" => p.y.to_string(),
        "tilecol" | "x" => p.x.to_string(),
        "zoom" | "z" => p.zoom.to_string(),
        "-y" => p.rows.saturating_sub(1).saturating_sub(p.y).to_string(),
        "proj" => p.projection_code.to_string(),
        "wkid" => p
            .projection_code
            .rsplit(':')
            .next()
            .unwrap_or(p.projection_code)
            .to_string(),
        "width" | "height" => p.tile_size.to_string(),
        "bbox" => {
            let b = p.bbox?;
            if p.bbox_lat_first {
                format_edges(&[b.min_north, b.min_east, b.max_north, b.max_east])
            } else {
                format_edges(&[b.min_east, b.min_north, b.max_east, b.max_north])
            }
        }
        "w" => format_coordinate(p.bbox?.min_east),
        "s" => format_coordinate(p.bbox?.min_north),
        "e" => format_coordinate(p.bbox?.max_east),
        "n" => format_coordinate(p.bbox?.max_north),
        _ => {
            return p
                .dimensions
                .iter()
                .find(|d| d.identifier.eq_ignore_ascii_case(token))
                .map(|d| d.default.clone())
        }
    };
    Some(value)
}

/// Fixed seven fraction digits, no grouping.
fn format_coordinate(value: f64) -> String {
    format!("{:.7}", value)
}

fn format_edges(edges: &[f64]) -> String {
    edges
        .iter()
        .map(|v| format_coordinate(*v))
        .collect::<Vec<_>>()
        .join(",")
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{([^{}]+)\}").expect("valid token pattern"))
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{header\(([^,]+),([^}]+)\)\}").expect("valid header token pattern")
    })
}
