//! WMTS capabilities parser.
//!
//! The document is parsed into an XML tree and then walked by recursive
//! descent: each element kind of interest has its own `visit_*` function
//! returning a typed node, and anything not recognised is skipped as a
//! whole subtree. Elements are matched by local name so the `ows:` and
//! `wmts:` prefixes a server chooses do not matter.
//!
//! # Tolerance
//!
//! One broken layer or matrix set does not fail the document:
//!
//! - a layer without a decodable image format is dropped with a warning
//! - a matrix set that violates the grid invariants is dropped together with
//!   the layers bound to it
//! - a missing `OperationsMetadata`/GetTile section means REST access
//!
//! Only a document that ends up with zero usable layers is rejected.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use roxmltree::{Document, Node};
use tracing::{debug, trace, warn};

use super::error::{CapabilitiesError, UnsupportedFormat};
use super::model::{Capabilities, Dimension, Layer, TransferMode};
use crate::grid::{MatrixError, TileMatrix, TileMatrixSet};
use crate::imaging::is_supported_mime;
use crate::projection::{EastNorth, ProjectionRegistry};

// =============================================================================
// Parsed nodes
// =============================================================================

#[derive(Debug, Default)]
struct ContentsNode {
    layers: Vec<LayerNode>,
    matrix_sets: Vec<TileMatrixSet>,
}

#[derive(Debug, Default)]
struct LayerNode {
    identifier: String,
    title: String,
    formats: Vec<String>,
    styles: Vec<StyleNode>,
    matrix_set_links: Vec<String>,
    dimensions: Vec<Dimension>,
    resource_urls: Vec<ResourceUrlNode>,
}

#[derive(Debug)]
struct StyleNode {
    identifier: String,
    is_default: bool,
}

#[derive(Debug)]
struct ResourceUrlNode {
    format: Option<String>,
    resource_type: String,
    template: String,
}

#[derive(Debug, Default)]
struct GetBindingNode {
    href: Option<String>,
    encoding: Option<TransferMode>,
}

// =============================================================================
// Entry point
// =============================================================================

/// Parses a WMTS capability document.
///
/// `document_url` becomes the base URL when the document does not
/// advertise a GetTile endpoint. The registry decides which CRSes need their
/// declared axis order swapped.
///
/// # Errors
///
/// Returns [`CapabilitiesError`] for undecodable or malformed documents,
/// a root element other than `Capabilities`, or when no usable layer is left.
pub fn parse_capabilities(
    data: &[u8],
    document_url: &str,
    registry: &dyn ProjectionRegistry,
) -> Result<Capabilities, CapabilitiesError> {
    let text = std::str::from_utf8(data)?;
    let document = Document::parse(text.trim_start_matches('\u{feff}'))?;

    let root = document.root_element();
    let root_name = root.tag_name().name();
    if root_name != "Capabilities" {
        return Err(CapabilitiesError::UnexpectedRoot(root_name.to_string()));
    }

    let (contents, bindings) = visit_capabilities(root, registry);
    let layers = bind_layers(contents);
    if layers.is_empty() {
        return Err(CapabilitiesError::NoUsableLayers);
    }

    let (base_url, transfer_mode) = resolve_transfer(&bindings, &layers, document_url);
    debug!(
        layers = layers.len(),
        mode = ?transfer_mode,
        base_url = %base_url,
        "Parsed capabilities"
    );

    Ok(Capabilities {
        base_url,
        transfer_mode,
        layers,
    })
}

/// Normalises CRS identifiers to `AUTHORITY:CODE`.
///
/// # Example
///
/// ```
/// use orthotile::capabilities::normalize_crs;
///
/// assert_eq!(normalize_crs("urn:ogc:def:crs:EPSG:6.18:3:3857"), "EPSG:3857");
/// assert_eq!(normalize_crs("urn:ogc:def:crs:EPSG::4326"), "EPSG:4326");
/// assert_eq!(normalize_crs("http://www.opengis.net/def/crs/EPSG/0/2180"), "EPSG:2180");
/// assert_eq!(normalize_crs("EPSG:3857"), "EPSG:3857");
/// ```
pub fn normalize_crs(crs: &str) -> String {
    static URN: OnceLock<Regex> = OnceLock::new();
    static HTTP: OnceLock<Regex> = OnceLock::new();

    let crs = crs.trim();
    let urn = URN.get_or_init(|| {
        Regex::new(r"^urn:ogc:def:crs:([^:]*):.*:(.*)$").expect("valid CRS URN pattern")
    });
    if urn.is_match(crs) {
        return urn.replace(crs, "$1:$2").into_owned();
    }

    let http = HTTP.get_or_init(|| {
        Regex::new(r"^https?://www\.opengis\.net/def/crs/([^/]+)/[^/]*/([^/]+)$")
            .expect("valid CRS URL pattern")
    });
    if http.is_match(crs) {
        return http.replace(crs, "$1:$2").into_owned();
    }

    crs.to_string()
}

// =============================================================================
// Visitors
// =============================================================================

fn visit_capabilities(
    node: Node<'_, '_>,
    registry: &dyn ProjectionRegistry,
) -> (ContentsNode, Vec<GetBindingNode>) {
    let mut contents = ContentsNode::default();
    let mut bindings = Vec::new();

    for child in elements(node) {
        match child.tag_name().name() {
            "Contents" => contents = visit_contents(child, registry),
            "OperationsMetadata" => bindings = visit_operations_metadata(child),
            other => trace!(element = other, "Skipping capabilities element"),
        }
    }

    (contents, bindings)
}

fn visit_contents(node: Node<'_, '_>, registry: &dyn ProjectionRegistry) -> ContentsNode {
    let mut contents = ContentsNode::default();

    for child in elements(node) {
        match child.tag_name().name() {
            "Layer" => contents.layers.push(visit_layer(child)),
            "TileMatrixSet" => match visit_tile_matrix_set(child, registry) {
                Ok(set) => contents.matrix_sets.push(set),
                Err(e) => warn!(error = %e, "Dropping tile matrix set"),
            },
            other => trace!(element = other, "Skipping contents element"),
        }
    }

    contents
}

fn visit_layer(node: Node<'_, '_>) -> LayerNode {
    let mut layer = LayerNode::default();

    for child in elements(node) {
        match child.tag_name().name() {
            "Identifier" => layer.identifier = text_of(child),
            "Title" => layer.title = text_of(child),
            "Format" => layer.formats.push(text_of(child)),
            "Style" => layer.styles.push(visit_style(child)),
            "TileMatrixSetLink" => layer.matrix_set_links.extend(visit_tile_matrix_set_link(child)),
            "Dimension" => layer.dimensions.push(visit_dimension(child)),
            "ResourceURL" => layer.resource_urls.extend(visit_resource_url(child)),
            other => trace!(element = other, "Skipping layer element"),
        }
    }

    layer
}

fn visit_style(node: Node<'_, '_>) -> StyleNode {
    let is_default = attribute(node, "isDefault")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
    StyleNode {
        identifier: child_text(node, "Identifier").unwrap_or_default(),
        is_default,
    }
}

fn visit_tile_matrix_set_link(node: Node<'_, '_>) -> Option<String> {
    child_text(node, "TileMatrixSet").filter(|id| !id.is_empty())
}

fn visit_dimension(node: Node<'_, '_>) -> Dimension {
    let mut dimension = Dimension {
        identifier: String::new(),
        default: String::new(),
        values: Vec::new(),
    };

    for child in elements(node) {
        match child.tag_name().name() {
            "Identifier" => dimension.identifier = text_of(child),
            "Default" => dimension.default = text_of(child),
            "Value" => dimension.values.push(text_of(child)),
            _ => {}
        }
    }

    dimension
}

fn visit_resource_url(node: Node<'_, '_>) -> Option<ResourceUrlNode> {
    let template = attribute(node, "template")?;
    Some(ResourceUrlNode {
        format: attribute(node, "format"),
        resource_type: attribute(node, "resourceType").unwrap_or_default(),
        template,
    })
}

fn visit_tile_matrix_set(
    node: Node<'_, '_>,
    registry: &dyn ProjectionRegistry,
) -> Result<TileMatrixSet, MatrixError> {
    let mut identifier = String::new();
    let mut crs = String::new();
    let mut matrix_nodes = Vec::new();

    for child in elements(node) {
        match child.tag_name().name() {
            "Identifier" => identifier = text_of(child),
            "SupportedCRS" => crs = normalize_crs(&text_of(child)),
            "TileMatrix" => matrix_nodes.push(child),
            other => trace!(element = other, "Skipping tile matrix set element"),
        }
    }

    let switch_xy = match registry.by_code(&crs) {
        Some(projection) => projection.switch_xy(),
        None => {
            debug!(crs = %crs, matrix_set = %identifier, "Unknown CRS, keeping declared axis order");
            false
        }
    };

    let mut matrices = matrix_nodes
        .into_iter()
        .map(|n| visit_tile_matrix(n, switch_xy))
        .collect::<Result<Vec<_>, _>>()?;
    matrices.sort_by(|a, b| b.scale_denominator().total_cmp(&a.scale_denominator()));

    TileMatrixSet::new(identifier, crs, matrices)
}

fn visit_tile_matrix(node: Node<'_, '_>, switch_xy: bool) -> Result<TileMatrix, MatrixError> {
    let mut identifier = None;
    let mut scale_denominator = None;
    let mut corner = None;
    let mut tile_width = None;
    let mut tile_height = None;
    let mut matrix_width = None;
    let mut matrix_height = None;

    for child in elements(node) {
        match child.tag_name().name() {
            "Identifier" => identifier = Some(text_of(child)),
            "ScaleDenominator" => scale_denominator = Some(parse_field(child, "ScaleDenominator")?),
            "TopLeftCorner" => corner = Some(parse_corner(child)?),
            "TileWidth" => tile_width = Some(parse_field(child, "TileWidth")?),
            "TileHeight" => tile_height = Some(parse_field(child, "TileHeight")?),
            "MatrixWidth" => matrix_width = Some(parse_field(child, "MatrixWidth")?),
            "MatrixHeight" => matrix_height = Some(parse_field(child, "MatrixHeight")?),
            _ => {}
        }
    }

    let matrix = TileMatrix::new(
        required(identifier, "Identifier")?,
        required(scale_denominator, "ScaleDenominator")?,
        required(corner, "TopLeftCorner")?,
        switch_xy,
        required(tile_width, "TileWidth")?,
        required(tile_height, "TileHeight")?,
    )?;

    Ok(matrix.with_extent(matrix_width, matrix_height))
}

fn visit_operations_metadata(node: Node<'_, '_>) -> Vec<GetBindingNode> {
    elements(node)
        .filter(|child| child.tag_name().name() == "Operation")
        .filter(|child| attribute(*child, "name").is_some_and(|n| n == "GetTile"))
        .flat_map(visit_operation)
        .collect()
}

fn visit_operation(node: Node<'_, '_>) -> Vec<GetBindingNode> {
    let mut bindings = Vec::new();
    for dcp in elements(node).filter(|c| c.tag_name().name() == "DCP") {
        for http in elements(dcp).filter(|c| c.tag_name().name() == "HTTP") {
            bindings.extend(
                elements(http)
                    .filter(|c| c.tag_name().name() == "Get")
                    .map(visit_get),
            );
        }
    }
    bindings
}

fn visit_get(node: Node<'_, '_>) -> GetBindingNode {
    let encoding = elements(node)
        .filter(|c| c.tag_name().name() == "Constraint")
        .filter(|c| attribute(*c, "name").is_some_and(|n| n == "GetEncoding"))
        .flat_map(elements)
        .filter(|c| c.tag_name().name() == "AllowedValues")
        .flat_map(elements)
        .filter(|c| c.tag_name().name() == "Value")
        .find_map(|v| TransferMode::from_encoding(&text_of(v)));

    GetBindingNode {
        href: attribute(node, "href").filter(|h| !h.is_empty()),
        encoding,
    }
}

// =============================================================================
// Assembly
// =============================================================================

fn bind_layers(contents: ContentsNode) -> Vec<Layer> {
    let sets: HashMap<String, Arc<TileMatrixSet>> = contents
        .matrix_sets
        .into_iter()
        .map(|set| (set.identifier().to_string(), Arc::new(set)))
        .collect();

    let mut layers = Vec::new();
    for node in contents.layers {
        if node.identifier.is_empty() {
            warn!(title = %node.title, "Dropping layer without identifier");
            continue;
        }

        let Some(format) = node.formats.iter().find(|f| is_supported_mime(f)).cloned() else {
            let error = UnsupportedFormat {
                layer: node.identifier.clone(),
                format: node.formats.join(", "),
            };
            warn!(error = %error, "Dropping layer");
            continue;
        };

        let style = node
            .styles
            .iter()
            .find(|s| s.is_default)
            .map(|s| s.identifier.clone())
            .unwrap_or_default();
        let rest_template = pick_tile_template(&node.resource_urls, &format);

        for link in &node.matrix_set_links {
            match sets.get(link) {
                Some(set) => layers.push(Layer {
                    identifier: node.identifier.clone(),
                    title: node.title.clone(),
                    format: format.clone(),
                    style: style.clone(),
                    rest_template: rest_template.clone(),
                    tile_matrix_set: Arc::clone(set),
                    dimensions: node.dimensions.clone(),
                }),
                None => warn!(
                    layer = %node.identifier,
                    matrix_set = %link,
                    "Layer links to unknown or invalid tile matrix set"
                ),
            }
        }
    }

    layers
}

fn pick_tile_template(urls: &[ResourceUrlNode], format: &str) -> Option<String> {
    let mut tiles = urls
        .iter()
        .filter(|u| u.resource_type.eq_ignore_ascii_case("tile"));
    let first = tiles.clone().next();
    tiles
        .find(|u| u.format.as_deref() == Some(format))
        .or(first)
        .map(|u| u.template.clone())
}

fn resolve_transfer(
    bindings: &[GetBindingNode],
    layers: &[Layer],
    document_url: &str,
) -> (String, TransferMode) {
    let href = |b: &GetBindingNode| b.href.clone().unwrap_or_else(|| document_url.to_string());

    if bindings.is_empty() {
        return (document_url.to_string(), TransferMode::Rest);
    }

    let has_templates = layers.iter().any(|l| l.rest_template.is_some());
    let rest = bindings.iter().find(|b| b.encoding == Some(TransferMode::Rest));
    let kvp = bindings.iter().find(|b| b.encoding == Some(TransferMode::Kvp));

    match (rest, kvp) {
        (Some(r), Some(k)) => {
            if has_templates {
                (href(r), TransferMode::Rest)
            } else {
                (href(k), TransferMode::Kvp)
            }
        }
        (Some(r), None) => (href(r), TransferMode::Rest),
        (None, Some(k)) => (href(k), TransferMode::Kvp),
        (None, None) => {
            // No GetEncoding constraint anywhere.
            let mode = if has_templates {
                TransferMode::Rest
            } else {
                TransferMode::Kvp
            };
            (href(&bindings[0]), mode)
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn elements<'a, 'input: 'a>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn text_of(node: Node<'_, '_>) -> String {
    node.text().map(str::trim).unwrap_or_default().to_string()
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    elements(node)
        .find(|c| c.tag_name().name() == name)
        .map(text_of)
}

/// Attribute value by local name, whatever its namespace (`xlink:href`).
fn attribute(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.attributes()
        .find(|a| a.name() == name)
        .map(|a| a.value().to_string())
}

fn parse_field<T: FromStr>(node: Node<'_, '_>, field: &'static str) -> Result<T, MatrixError> {
    let value = text_of(node);
    value
        .parse()
        .map_err(|_| MatrixError::InvalidField { field, value })
}

fn parse_corner(node: Node<'_, '_>) -> Result<EastNorth, MatrixError> {
    let value = text_of(node);
    let mut parts = value.split_whitespace().map(f64::from_str);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(first)), Some(Ok(second)), None) => Ok(EastNorth::new(first, second)),
        _ => Err(MatrixError::InvalidField {
            field: "TopLeftCorner",
            value,
        }),
    }
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, MatrixError> {
    value.ok_or(MatrixError::InvalidField {
        field,
        value: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::BuiltinRegistry;

    const DOC_URL: &str = "https://tiles.example.com/wmts/1.0.0/WMTSCapabilities.xml";

    fn matrix_set_xml(id: &str, crs: &str, corner: &str, levels: u32) -> String {
        let mut xml = format!(
            "<TileMatrixSet><ows:Identifier>{}</ows:Identifier><ows:SupportedCRS>{}</ows:SupportedCRS>",
            id, crs
        );
        for z in 0..levels {
            xml.push_str(&format!(
                "<TileMatrix><ows:Identifier>{z}</ows:Identifier>\
                 <ScaleDenominator>{}</ScaleDenominator>\
                 <TopLeftCorner>{corner}</TopLeftCorner>\
                 <TileWidth>256</TileWidth><TileHeight>256</TileHeight>\
                 <MatrixWidth>{n}</MatrixWidth><MatrixHeight>{n}</MatrixHeight></TileMatrix>",
                559_082_264.028_717_9 / f64::from(1u32 << z),
                n = 1u32 << z,
            ));
        }
        xml.push_str("</TileMatrixSet>");
        xml
    }

    fn document(contents: &str, operations: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Capabilities xmlns="http://www.opengis.net/wmts/1.0"
              xmlns:ows="http://www.opengis.net/ows/1.1"
              xmlns:xlink="http://www.w3.org/1999/xlink" version="1.0.0">
  <ows:ServiceIdentification><ows:Title>Test</ows:Title></ows:ServiceIdentification>
  {operations}
  <Contents>{contents}</Contents>
  <ServiceMetadataURL xlink:href="{DOC_URL}"/>
</Capabilities>"#
        )
    }

    fn layer_xml(id: &str, format: &str, links: &[&str]) -> String {
        let links: String = links
            .iter()
            .map(|l| format!("<TileMatrixSetLink><TileMatrixSet>{}</TileMatrixSet></TileMatrixSetLink>", l))
            .collect();
        format!(
            "<Layer><ows:Title>{id} title</ows:Title><ows:Identifier>{id}</ows:Identifier>\
             <Style isDefault=\"true\"><ows:Identifier>default</ows:Identifier></Style>\
             <Format>{format}</Format>{links}\
             <ResourceURL format=\"{format}\" resourceType=\"tile\" \
              template=\"https://tiles.example.com/{id}/{{TileMatrixSet}}/{{TileMatrix}}/{{TileRow}}/{{TileCol}}.png\"/>\
             </Layer>"
        )
    }

    fn kvp_operations(encoding: &str) -> String {
        format!(
            r#"<ows:OperationsMetadata>
  <ows:Operation name="GetCapabilities">
    <ows:DCP><ows:HTTP><ows:Get xlink:href="https://tiles.example.com/caps?"/></ows:HTTP></ows:DCP>
  </ows:Operation>
  <ows:Operation name="GetTile">
    <ows:DCP><ows:HTTP>
      <ows:Get xlink:href="https://tiles.example.com/service?">
        <ows:Constraint name="GetEncoding">
          <ows:AllowedValues><ows:Value>{encoding}</ows:Value></ows:AllowedValues>
        </ows:Constraint>
      </ows:Get>
    </ows:HTTP></ows:DCP>
  </ows:Operation>
</ows:OperationsMetadata>"#
        )
    }

    fn parse(xml: &str) -> Result<Capabilities, CapabilitiesError> {
        parse_capabilities(xml.as_bytes(), DOC_URL, &BuiltinRegistry::new())
    }

    #[test]
    fn test_layer_expanded_per_matrix_set() {
        let contents = format!(
            "{}{}{}",
            layer_xml("ortho", "image/png", &["merc", "wgs"]),
            matrix_set_xml("merc", "urn:ogc:def:crs:EPSG:6.18:3:3857", "-20037508.3428 20037508.3428", 3),
            matrix_set_xml("wgs", "urn:ogc:def:crs:EPSG::4326", "90 -180", 2),
        );
        let caps = parse(&document(&contents, "")).unwrap();

        assert_eq!(caps.layers.len(), 2);
        assert!(caps.layers.iter().all(|l| l.identifier == "ortho" && l.style == "default"));
        assert_eq!(caps.layers[0].crs(), "EPSG:3857");
        assert_eq!(caps.layers[1].crs(), "EPSG:4326");
        assert_eq!(caps.layer_identifiers(), vec!["ortho"]);
        assert_eq!(caps.layers_named("ortho").count(), 2);
    }

    #[test]
    fn test_missing_operations_defaults_to_rest() {
        let contents = format!(
            "{}{}",
            layer_xml("ortho", "image/png", &["merc"]),
            matrix_set_xml("merc", "EPSG:3857", "-20037508.3428 20037508.3428", 2),
        );
        let caps = parse(&document(&contents, "")).unwrap();

        assert_eq!(caps.transfer_mode, TransferMode::Rest);
        assert_eq!(caps.base_url, DOC_URL);
        assert!(caps.layers[0].rest_template.as_deref().unwrap().contains("{TileMatrix}"));
    }

    #[test]
    fn test_kvp_endpoint_detected() {
        let contents = format!(
            "{}{}",
            layer_xml("ortho", "image/jpeg", &["merc"]),
            matrix_set_xml("merc", "EPSG:3857", "-20037508.3428 20037508.3428", 2),
        );
        let caps = parse(&document(&contents, &kvp_operations("KVP"))).unwrap();

        assert_eq!(caps.transfer_mode, TransferMode::Kvp);
        assert_eq!(caps.base_url, "https://tiles.example.com/service?");
    }

    #[test]
    fn test_restful_constraint() {
        let contents = format!(
            "{}{}",
            layer_xml("ortho", "image/png", &["merc"]),
            matrix_set_xml("merc", "EPSG:3857", "-20037508.3428 20037508.3428", 2),
        );
        let caps = parse(&document(&contents, &kvp_operations("RESTful"))).unwrap();
        assert_eq!(caps.transfer_mode, TransferMode::Rest);
    }

    #[test]
    fn test_bad_format_layer_dropped_good_layer_kept() {
        let contents = format!(
            "{}{}{}",
            layer_xml("vector", "application/vnd.mapbox-vector-tile", &["merc"]),
            layer_xml("ortho", "image/png", &["merc"]),
            matrix_set_xml("merc", "EPSG:3857", "-20037508.3428 20037508.3428", 2),
        );
        let caps = parse(&document(&contents, "")).unwrap();

        assert_eq!(caps.layers.len(), 1);
        assert_eq!(caps.layers[0].identifier, "ortho");
    }

    #[test]
    fn test_zero_usable_layers_is_error() {
        let contents = format!(
            "{}{}",
            layer_xml("vector", "application/x-protobuf", &["merc"]),
            matrix_set_xml("merc", "EPSG:3857", "-20037508.3428 20037508.3428", 2),
        );
        let result = parse(&document(&contents, ""));
        assert!(matches!(result, Err(CapabilitiesError::NoUsableLayers)));
    }

    #[test]
    fn test_axis_swap_for_lat_first_crs() {
        let contents = format!(
            "{}{}",
            layer_xml("ortho", "image/png", &["wgs"]),
            matrix_set_xml("wgs", "EPSG:4326", "90 -180", 1),
        );
        let caps = parse(&document(&contents, "")).unwrap();
        let corner = caps.layers[0].tile_matrix_set.matrices()[0].top_left_corner();
        assert_eq!(corner, EastNorth::new(-180.0, 90.0));
    }

    #[test]
    fn test_unsorted_matrices_are_sorted_coarsest_first() {
        let set = "<TileMatrixSet><ows:Identifier>merc</ows:Identifier>\
            <ows:SupportedCRS>EPSG:3857</ows:SupportedCRS>\
            <TileMatrix><ows:Identifier>fine</ows:Identifier><ScaleDenominator>1000</ScaleDenominator>\
            <TopLeftCorner>0 0</TopLeftCorner><TileWidth>256</TileWidth><TileHeight>256</TileHeight></TileMatrix>\
            <TileMatrix><ows:Identifier>coarse</ows:Identifier><ScaleDenominator>2000</ScaleDenominator>\
            <TopLeftCorner>0 0</TopLeftCorner><TileWidth>256</TileWidth><TileHeight>256</TileHeight></TileMatrix>\
            </TileMatrixSet>";
        let contents = format!("{}{}", layer_xml("ortho", "image/png", &["merc"]), set);
        let caps = parse(&document(&contents, "")).unwrap();

        let matrices = caps.layers[0].tile_matrix_set.matrices();
        assert_eq!(matrices[0].identifier(), "coarse");
        assert_eq!(matrices[1].identifier(), "fine");
        assert_eq!(matrices[0].matrix_width(), None);
    }

    #[test]
    fn test_non_square_matrix_set_dropped_with_its_layers() {
        let bad = "<TileMatrixSet><ows:Identifier>bad</ows:Identifier>\
            <ows:SupportedCRS>EPSG:3857</ows:SupportedCRS>\
            <TileMatrix><ows:Identifier>0</ows:Identifier><ScaleDenominator>1000</ScaleDenominator>\
            <TopLeftCorner>0 0</TopLeftCorner><TileWidth>256</TileWidth><TileHeight>512</TileHeight></TileMatrix>\
            </TileMatrixSet>";
        let contents = format!(
            "{}{}{}",
            layer_xml("ortho", "image/png", &["bad", "merc"]),
            bad,
            matrix_set_xml("merc", "EPSG:3857", "-20037508.3428 20037508.3428", 1),
        );
        let caps = parse(&document(&contents, "")).unwrap();

        assert_eq!(caps.layers.len(), 1);
        assert_eq!(caps.layers[0].tile_matrix_set.identifier(), "merc");
    }

    #[test]
    fn test_dimensions_and_unknown_elements() {
        let layer = "<Layer><ows:Identifier>temp</ows:Identifier><Format>image/png</Format>\
            <ows:WGS84BoundingBox><ows:LowerCorner>-180 -90</ows:LowerCorner>\
              <Layer><ows:Identifier>nested-noise</ows:Identifier></Layer></ows:WGS84BoundingBox>\
            <Dimension><ows:Identifier>Time</ows:Identifier><Default>2024-01-01</Default>\
              <Value>2024-01-01</Value><Value>2023-01-01</Value></Dimension>\
            <TileMatrixSetLink><TileMatrixSet>merc</TileMatrixSet></TileMatrixSetLink></Layer>";
        let contents = format!(
            "{}{}",
            layer,
            matrix_set_xml("merc", "EPSG:3857", "-20037508.3428 20037508.3428", 1)
        );
        let caps = parse(&document(&contents, "")).unwrap();

        let layer = &caps.layers[0];
        assert_eq!(layer.identifier, "temp");
        assert_eq!(layer.style, "");
        assert_eq!(layer.dimensions.len(), 1);
        assert_eq!(layer.dimensions[0].identifier, "Time");
        assert_eq!(layer.dimensions[0].default, "2024-01-01");
        assert_eq!(layer.dimensions[0].values.len(), 2);
    }

    #[test]
    fn test_rejects_malformed_xml() {
        assert!(matches!(parse("<Capabilities><Contents>"), Err(CapabilitiesError::Xml(_))));
    }

    #[test]
    fn test_rejects_wrong_root() {
        let result = parse("<WMS_Capabilities version=\"1.3.0\"/>");
        assert!(matches!(result, Err(CapabilitiesError::UnexpectedRoot(name)) if name == "WMS_Capabilities"));
    }

    #[test]
    fn test_first_supported_format_chosen() {
        let layer = "<Layer><ows:Identifier>mixed</ows:Identifier>\
            <Format>application/x-protobuf</Format><Format>image/jpeg</Format>\
            <TileMatrixSetLink><TileMatrixSet>merc</TileMatrixSet></TileMatrixSetLink></Layer>";
        let contents = format!(
            "{}{}",
            layer,
            matrix_set_xml("merc", "EPSG:3857", "-20037508.3428 20037508.3428", 1)
        );
        let caps = parse(&document(&contents, "")).unwrap();
        assert_eq!(caps.layers[0].format, "image/jpeg");
    }
}
