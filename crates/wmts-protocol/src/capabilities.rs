//! WMTS Capabilities document.

use std::fmt::Write;

use cube_common::{BoundingBox, TileMatrixSet};
use quick_xml::escape::escape;

use crate::format::ImageFormat;
use crate::request::LayerId;

/// One `<dataset>.<variable>` layer.
#[derive(Debug, Clone)]
pub struct LayerInfo {
    pub layer: LayerId,
    pub title: String,
    pub abstract_text: Option<String>,
    pub bbox: BoundingBox,
    pub tile_matrix_set: String,
    /// RFC 3339 time values, oldest first; the last one is the default.
    pub times: Vec<String>,
    pub styles: Vec<StyleInfo>,
}

#[derive(Debug, Clone)]
pub struct StyleInfo {
    pub identifier: String,
    pub is_default: bool,
}

impl StyleInfo {
    pub fn new(identifier: impl Into<String>, is_default: bool) -> Self {
        Self {
            identifier: identifier.into(),
            is_default,
        }
    }
}

/// Builds the Capabilities XML for a set of layers and their matrix sets.
#[derive(Debug, Clone, Default)]
pub struct CapabilitiesBuilder {
    pub title: String,
    pub base_url: String,
    pub layers: Vec<LayerInfo>,
    pub tile_matrix_sets: Vec<TileMatrixSet>,
}

impl CapabilitiesBuilder {
    pub fn new(title: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn layer(mut self, layer: LayerInfo) -> Self {
        self.layers.push(layer);
        self
    }

    /// Add a matrix set unless one with the same identifier is present.
    pub fn tile_matrix_set(mut self, tms: TileMatrixSet) -> Self {
        if !self
            .tile_matrix_sets
            .iter()
            .any(|t| t.identifier == tms.identifier)
        {
            self.tile_matrix_sets.push(tms);
        }
        self
    }

    pub fn build(&self) -> String {
        let mut xml = String::with_capacity(4096 + self.layers.len() * 1024);

        xml.push_str(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Capabilities xmlns="http://www.opengis.net/wmts/1.0"
    xmlns:ows="http://www.opengis.net/ows/1.1"
    xmlns:xlink="http://www.w3.org/1999/xlink"
    version="1.0.0">
"#,
        );

        let _ = write!(
            xml,
            r#"  <ows:ServiceIdentification>
    <ows:Title>{}</ows:Title>
    <ows:ServiceType>OGC WMTS</ows:ServiceType>
    <ows:ServiceTypeVersion>1.0.0</ows:ServiceTypeVersion>
  </ows:ServiceIdentification>
"#,
            escape(&self.title)
        );

        self.write_operations(&mut xml);

        xml.push_str("  <Contents>\n");
        for layer in &self.layers {
            self.write_layer(&mut xml, layer);
        }
        for tms in &self.tile_matrix_sets {
            write_tile_matrix_set(&mut xml, tms);
        }
        xml.push_str("  </Contents>\n");

        let _ = write!(
            xml,
            "  <ServiceMetadataURL xlink:href=\"{}/wmts/1.0.0/WMTSCapabilities.xml\"/>\n",
            escape(&self.base_url)
        );
        xml.push_str("</Capabilities>\n");
        xml
    }

    fn write_operations(&self, xml: &mut String) {
        let base = escape(&self.base_url);
        xml.push_str("  <ows:OperationsMetadata>\n");
        for (operation, rest) in [
            ("GetCapabilities", format!("{}/wmts/1.0.0/WMTSCapabilities.xml", base)),
            ("GetTile", format!("{}/wmts/1.0.0/tile/", base)),
            ("GetFeatureInfo", format!("{}/wmts/1.0.0/featureinfo/", base)),
        ] {
            let _ = write!(
                xml,
                r#"    <ows:Operation name="{op}">
      <ows:DCP>
        <ows:HTTP>
          <ows:Get xlink:href="{base}/wmts/kvp?">
            <ows:Constraint name="GetEncoding">
              <ows:AllowedValues><ows:Value>KVP</ows:Value></ows:AllowedValues>
            </ows:Constraint>
          </ows:Get>
          <ows:Get xlink:href="{rest}">
            <ows:Constraint name="GetEncoding">
              <ows:AllowedValues><ows:Value>RESTful</ows:Value></ows:AllowedValues>
            </ows:Constraint>
          </ows:Get>
        </ows:HTTP>
      </ows:DCP>
    </ows:Operation>
"#,
                op = operation,
                base = base,
                rest = rest
            );
        }
        xml.push_str("  </ows:OperationsMetadata>\n");
    }

    fn write_layer(&self, xml: &mut String, layer: &LayerInfo) {
        let _ = write!(
            xml,
            r#"    <Layer>
      <ows:Identifier>{}</ows:Identifier>
      <ows:Title>{}</ows:Title>
"#,
            escape(&layer.layer.to_string()),
            escape(&layer.title)
        );
        if let Some(abstract_text) = &layer.abstract_text {
            let _ = writeln!(xml, "      <ows:Abstract>{}</ows:Abstract>", escape(abstract_text));
        }

        let _ = write!(
            xml,
            r#"      <ows:WGS84BoundingBox crs="urn:ogc:def:crs:OGC:2:84">
        <ows:LowerCorner>{} {}</ows:LowerCorner>
        <ows:UpperCorner>{} {}</ows:UpperCorner>
      </ows:WGS84BoundingBox>
"#,
            layer.bbox.min_x, layer.bbox.min_y, layer.bbox.max_x, layer.bbox.max_y
        );

        for style in &layer.styles {
            let _ = write!(
                xml,
                r#"      <Style isDefault="{}">
        <ows:Identifier>{}</ows:Identifier>
      </Style>
"#,
                style.is_default,
                escape(&style.identifier)
            );
        }

        for format in ImageFormat::ALL {
            let _ = writeln!(xml, "      <Format>{}</Format>", format.mime_type());
        }

        if let Some(default) = layer.times.last() {
            let _ = write!(
                xml,
                "      <Dimension>\n        <ows:Identifier>time</ows:Identifier>\n        <ows:UOM>ISO8601</ows:UOM>\n        <Default>{}</Default>\n        <Current>false</Current>\n",
                escape(default)
            );
            for time in &layer.times {
                let _ = writeln!(xml, "        <Value>{}</Value>", escape(time));
            }
            xml.push_str("      </Dimension>\n");
        }

        let _ = write!(
            xml,
            r#"      <TileMatrixSetLink>
        <TileMatrixSet>{}</TileMatrixSet>
      </TileMatrixSetLink>
      <ResourceURL format="image/png" resourceType="tile" template="{}/wmts/1.0.0/tile/{}/{}/{{TileMatrix}}/{{TileRow}}/{{TileCol}}.png"/>
    </Layer>
"#,
            escape(&layer.tile_matrix_set),
            escape(&self.base_url),
            escape(&layer.layer.dataset),
            escape(&layer.layer.variable)
        );
    }
}

fn write_tile_matrix_set(xml: &mut String, tms: &TileMatrixSet) {
    let _ = write!(
        xml,
        r#"    <TileMatrixSet>
      <ows:Identifier>{}</ows:Identifier>
      <ows:SupportedCRS>urn:ogc:def:crs:OGC:1.3:CRS84</ows:SupportedCRS>
"#,
        escape(&tms.identifier)
    );
    for matrix in &tms.matrices {
        let _ = write!(
            xml,
            r#"      <TileMatrix>
        <ows:Identifier>{}</ows:Identifier>
        <ScaleDenominator>{}</ScaleDenominator>
        <TopLeftCorner>-180 90</TopLeftCorner>
        <TileWidth>{}</TileWidth>
        <TileHeight>{}</TileHeight>
        <MatrixWidth>{}</MatrixWidth>
        <MatrixHeight>{}</MatrixHeight>
      </TileMatrix>
"#,
            matrix.identifier,
            matrix.scale_denominator,
            matrix.tile_size,
            matrix.tile_size,
            matrix.matrix_width,
            matrix.matrix_height
        );
    }
    xml.push_str("    </TileMatrixSet>\n");
}
