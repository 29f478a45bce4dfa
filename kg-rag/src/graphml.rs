//! GraphML reading and writing.
//!
//! Follows the conventions of APOC's `apoc.import.graphml` with `readLabels: true`:
//! node labels come from a `labels` attribute or data key in `":A:B"` form, and
//! relationship types from an edge's `label` attribute or data key.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::Value;

use crate::errors::{KgRagError, Result};

/// Relationship type given to edges that carry no label.
pub const DEFAULT_REL_TYPE: &str = "RELATED_TO";

/// A whole graph as described by one GraphML file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphDocument {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub labels: Vec<String>,
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    pub rel_type: String,
    pub properties: BTreeMap<String, Value>,
}

impl GraphNode {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

impl GraphDocument {
    /// Total number of properties across nodes and edges.
    pub fn property_count(&self) -> usize {
        self.nodes.iter().map(|n| n.properties.len()).sum::<usize>()
            + self.edges.iter().map(|e| e.properties.len()).sum::<usize>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AttrType {
    Boolean,
    Int,
    Float,
    Text,
}

impl AttrType {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("boolean") => AttrType::Boolean,
            Some("int") | Some("long") => AttrType::Int,
            Some("float") | Some("double") => AttrType::Float,
            _ => AttrType::Text,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            AttrType::Boolean => "boolean",
            AttrType::Int => "long",
            AttrType::Float => "double",
            AttrType::Text => "string",
        }
    }

    fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => AttrType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => AttrType::Int,
            Value::Number(_) => AttrType::Float,
            _ => AttrType::Text,
        }
    }

    fn convert(self, key: &str, raw: &str) -> Result<Value> {
        let raw = raw.trim();
        let invalid =
            || KgRagError::Import(format!("invalid {} value '{raw}' for key '{key}'", self.as_str()));
        match self {
            AttrType::Boolean => raw
                .to_ascii_lowercase()
                .parse::<bool>()
                .map(Value::Bool)
                .map_err(|_| invalid()),
            AttrType::Int => raw.parse::<i64>().map(Value::from).map_err(|_| invalid()),
            AttrType::Float => raw.parse::<f64>().map(Value::from).map_err(|_| invalid()),
            AttrType::Text => Ok(Value::String(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum KeyDomain {
    Node,
    Edge,
    All,
    /// `graph`, `graphml`, `port`, `hyperedge`: never copied onto nodes or edges.
    Other,
}

#[derive(Debug, Clone)]
struct KeyDef {
    name: String,
    domain: KeyDomain,
    kind: AttrType,
    default: Option<String>,
}

enum Element {
    Node(GraphNode),
    Edge(GraphEdge),
}

/// Read and parse a GraphML file.
pub async fn parse_file(path: &Path) -> Result<GraphDocument> {
    let xml = tokio::fs::read_to_string(path).await.map_err(|e| {
        KgRagError::Import(format!("cannot read {}: {e}", path.display()))
    })?;
    parse_str(&xml)
}

/// Parse a GraphML document.
///
/// Fails with [`KgRagError::Import`] when the input is not well-formed XML,
/// has no `<graphml>` root, repeats a node id, or has edges pointing at
/// unknown nodes.
pub fn parse_str(xml: &str) -> Result<GraphDocument> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut doc = GraphDocument::default();
    let mut keys: HashMap<String, KeyDef> = HashMap::new();
    let mut seen_root = false;
    let mut current_key: Option<String> = None;
    let mut in_default = false;
    let mut current: Option<Element> = None;
    let mut data_key: Option<String> = None;
    let mut text = String::new();
    let mut node_ids: HashSet<String> = HashSet::new();

    loop {
        let event = reader.read_event().map_err(malformed)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let attrs = attributes(e)?;
                match e.local_name().as_ref() {
                    b"graphml" => seen_root = true,
                    b"key" => {
                        let id = required(&attrs, "id", "key")?;
                        let domain = match attrs.get("for").map(String::as_str) {
                            Some("node") => KeyDomain::Node,
                            Some("edge") => KeyDomain::Edge,
                            None | Some("all") => KeyDomain::All,
                            Some(_) => KeyDomain::Other,
                        };
                        let def = KeyDef {
                            name: attrs.get("attr.name").cloned().unwrap_or_else(|| id.clone()),
                            domain,
                            kind: AttrType::parse(attrs.get("attr.type").map(String::as_str)),
                            default: None,
                        };
                        keys.insert(id.clone(), def);
                        if !is_empty {
                            current_key = Some(id);
                        }
                    }
                    b"default" if !is_empty => {
                        in_default = true;
                        text.clear();
                    }
                    b"node" => {
                        ensure_root(seen_root)?;
                        if current.is_some() {
                            return Err(KgRagError::Import(
                                "nested graphs are not supported".to_string(),
                            ));
                        }
                        let node = GraphNode {
                            id: required(&attrs, "id", "node")?,
                            labels: attrs.get("labels").map(|l| parse_labels(l)).unwrap_or_default(),
                            properties: BTreeMap::new(),
                        };
                        if is_empty {
                            finish_node(&mut doc, &mut node_ids, &keys, node)?;
                        } else {
                            current = Some(Element::Node(node));
                        }
                    }
                    b"edge" => {
                        ensure_root(seen_root)?;
                        let edge = GraphEdge {
                            id: attrs.get("id").cloned(),
                            source: required(&attrs, "source", "edge")?,
                            target: required(&attrs, "target", "edge")?,
                            rel_type: attrs.get("label").cloned().unwrap_or_default(),
                            properties: BTreeMap::new(),
                        };
                        if is_empty {
                            finish_edge(&mut doc, &keys, edge);
                        } else {
                            current = Some(Element::Edge(edge));
                        }
                    }
                    b"data" => {
                        let key = required(&attrs, "key", "data")?;
                        if is_empty {
                            apply_data(current.as_mut(), &keys, &key, "")?;
                        } else {
                            data_key = Some(key);
                            text.clear();
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                if in_default || data_key.is_some() {
                    text.push_str(&t.unescape().map_err(malformed)?);
                }
            }
            Event::CData(c) => {
                if in_default || data_key.is_some() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"default" => {
                    if let Some(def) = current_key.as_ref().and_then(|id| keys.get_mut(id)) {
                        def.default = Some(std::mem::take(&mut text));
                    }
                    in_default = false;
                }
                b"key" => current_key = None,
                b"data" => {
                    if let Some(key) = data_key.take() {
                        apply_data(current.as_mut(), &keys, &key, &text)?;
                    }
                    text.clear();
                }
                b"node" => {
                    if let Some(Element::Node(node)) = current.take() {
                        finish_node(&mut doc, &mut node_ids, &keys, node)?;
                    }
                }
                b"edge" => {
                    if let Some(Element::Edge(edge)) = current.take() {
                        finish_edge(&mut doc, &keys, edge);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(KgRagError::Import("not a GraphML document".to_string()));
    }
    if current.is_some() {
        return Err(KgRagError::Import("unexpected end of document".to_string()));
    }

    for edge in &doc.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !node_ids.contains(endpoint) {
                return Err(KgRagError::Import(format!(
                    "edge {} -> {} references unknown node '{endpoint}'",
                    edge.source, edge.target
                )));
            }
        }
    }

    Ok(doc)
}

/// Serialise a document as GraphML, with `labels` and `label` keys that
/// [`parse_str`] (and APOC) read back.
pub fn to_graphml(doc: &GraphDocument) -> String {
    let node_keys = collect_keys(doc.nodes.iter().map(|n| &n.properties));
    let edge_keys = collect_keys(doc.edges.iter().map(|e| &e.properties));

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">\n");
    out.push_str("<key id=\"labels\" for=\"node\" attr.name=\"labels\" attr.type=\"string\"/>\n");
    for (name, kind) in &node_keys {
        let _ = writeln!(
            out,
            "<key id=\"n_{0}\" for=\"node\" attr.name=\"{0}\" attr.type=\"{1}\"/>",
            escape(name),
            kind.as_str()
        );
    }
    out.push_str("<key id=\"label\" for=\"edge\" attr.name=\"label\" attr.type=\"string\"/>\n");
    for (name, kind) in &edge_keys {
        let _ = writeln!(
            out,
            "<key id=\"e_{0}\" for=\"edge\" attr.name=\"{0}\" attr.type=\"{1}\"/>",
            escape(name),
            kind.as_str()
        );
    }
    out.push_str("<graph id=\"G\" edgedefault=\"directed\">\n");

    for node in &doc.nodes {
        let labels = render_labels(&node.labels);
        let _ = write!(
            out,
            "<node id=\"{}\" labels=\"{}\"><data key=\"labels\">{}</data>",
            escape(&node.id),
            escape(&labels),
            escape(&labels)
        );
        for (name, value) in &node.properties {
            let _ = write!(out, "<data key=\"n_{}\">{}</data>", escape(name), escape(&render_value(value)));
        }
        out.push_str("</node>\n");
    }

    for (i, edge) in doc.edges.iter().enumerate() {
        let id = edge.id.clone().unwrap_or_else(|| format!("e{i}"));
        let _ = write!(
            out,
            "<edge id=\"{}\" source=\"{}\" target=\"{}\" label=\"{}\"><data key=\"label\">{}</data>",
            escape(&id),
            escape(&edge.source),
            escape(&edge.target),
            escape(&edge.rel_type),
            escape(&edge.rel_type)
        );
        for (name, value) in &edge.properties {
            let _ = write!(out, "<data key=\"e_{}\">{}</data>", escape(name), escape(&render_value(value)));
        }
        out.push_str("</edge>\n");
    }

    out.push_str("</graph>\n</graphml>\n");
    out
}

fn malformed(err: impl std::fmt::Display) -> KgRagError {
    KgRagError::Import(format!("malformed GraphML: {err}"))
}

fn ensure_root(seen_root: bool) -> Result<()> {
    if seen_root {
        Ok(())
    } else {
        Err(KgRagError::Import("not a GraphML document".to_string()))
    }
}

fn attributes(e: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(malformed)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(malformed)?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn required(attrs: &HashMap<String, String>, name: &str, element: &str) -> Result<String> {
    attrs
        .get(name)
        .cloned()
        .ok_or_else(|| KgRagError::Import(format!("<{element}> is missing the '{name}' attribute")))
}

/// Split an APOC label string (`":Episodic:Video"`) into labels.
fn parse_labels(raw: &str) -> Vec<String> {
    raw.split(':')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn render_labels(labels: &[String]) -> String {
    labels.iter().map(|l| format!(":{l}")).collect()
}

fn apply_data(
    current: Option<&mut Element>,
    keys: &HashMap<String, KeyDef>,
    key: &str,
    raw: &str,
) -> Result<()> {
    let Some(element) = current else {
        // graph-level data carries nothing we import
        return Ok(());
    };
    let (name, kind) = match keys.get(key) {
        Some(def) => (def.name.as_str(), def.kind),
        None => (key, AttrType::Text),
    };

    match element {
        Element::Node(node) if name == "labels" => {
            if node.labels.is_empty() {
                node.labels = parse_labels(raw);
            }
        }
        Element::Edge(edge) if name == "label" => {
            if edge.rel_type.is_empty() {
                edge.rel_type = raw.trim().to_string();
            }
        }
        Element::Node(node) => {
            node.properties.insert(name.to_string(), kind.convert(name, raw)?);
        }
        Element::Edge(edge) => {
            edge.properties.insert(name.to_string(), kind.convert(name, raw)?);
        }
    }
    Ok(())
}

fn apply_defaults(
    properties: &mut BTreeMap<String, Value>,
    keys: &HashMap<String, KeyDef>,
    domain: KeyDomain,
    reserved: &str,
) {
    for def in keys.values() {
        if def.domain != domain && def.domain != KeyDomain::All {
            continue;
        }
        if def.name == reserved || properties.contains_key(&def.name) {
            continue;
        }
        if let Some(default) = &def.default {
            if let Ok(value) = def.kind.convert(&def.name, default) {
                properties.insert(def.name.clone(), value);
            }
        }
    }
}

fn finish_node(
    doc: &mut GraphDocument,
    node_ids: &mut HashSet<String>,
    keys: &HashMap<String, KeyDef>,
    mut node: GraphNode,
) -> Result<()> {
    if !node_ids.insert(node.id.clone()) {
        return Err(KgRagError::Import(format!("duplicate node id '{}'", node.id)));
    }
    apply_defaults(&mut node.properties, keys, KeyDomain::Node, "labels");
    doc.nodes.push(node);
    Ok(())
}

fn finish_edge(doc: &mut GraphDocument, keys: &HashMap<String, KeyDef>, mut edge: GraphEdge) {
    apply_defaults(&mut edge.properties, keys, KeyDomain::Edge, "label");
    if edge.rel_type.is_empty() {
        edge.rel_type = DEFAULT_REL_TYPE.to_string();
    }
    doc.edges.push(edge);
}

fn collect_keys<'a>(
    maps: impl Iterator<Item = &'a BTreeMap<String, Value>>,
) -> BTreeMap<String, AttrType> {
    let mut keys = BTreeMap::new();
    for props in maps {
        for (name, value) in props {
            let kind = AttrType::of(value);
            keys.entry(name.clone())
                .and_modify(|existing: &mut AttrType| {
                    if *existing != kind {
                        *existing = AttrType::Text;
                    }
                })
                .or_insert(kind);
        }
    }
    keys
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn escape(s: &str) -> String {
    quick_xml::escape::escape(s).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<graphml xmlns="http://graphml.graphdrawing.org/xmlns">
  <key id="labels" for="node" attr.name="labels"/>
  <key id="name" for="node" attr.name="name" attr.type="string"/>
  <key id="content" for="node" attr.name="content" attr.type="string"/>
  <key id="start" for="node" attr.name="start_time" attr.type="double"/>
  <key id="rank" for="node" attr.name="rank" attr.type="int">
    <default>7</default>
  </key>
  <key id="label" for="edge" attr.name="label"/>
  <key id="weight" for="edge" attr.name="weight" attr.type="float"/>
  <key id="hot" for="edge" attr.name="hot" attr.type="boolean"/>
  <graph id="G" edgedefault="directed">
    <node id="n0" labels=":Episodic">
      <data key="labels">:Episodic</data>
      <data key="name">Episode_0</data>
      <data key="content">A person &amp; a dog walk into the park.</data>
      <data key="start">0.0</data>
    </node>
    <node id="n1">
      <data key="labels">:Entity:Animal</data>
      <data key="name">dog</data>
      <data key="rank">2</data>
    </node>
    <node id="n2" labels=":Entity"/>
    <edge id="e0" source="n0" target="n1" label="MENTIONS">
      <data key="weight">0.5</data>
      <data key="hot">True</data>
    </edge>
    <edge source="n1" target="n2"/>
  </graph>
</graphml>"#;

    #[test]
    fn test_parse_nodes_labels_and_typed_properties() {
        let doc = parse_str(SAMPLE).expect("sample parses");
        assert_eq!(doc.nodes.len(), 3);

        let episode = &doc.nodes[0];
        assert_eq!(episode.labels, vec!["Episodic"]);
        assert_eq!(episode.properties["name"], json!("Episode_0"));
        assert_eq!(
            episode.properties["content"],
            json!("A person & a dog walk into the park.")
        );
        assert_eq!(episode.properties["start_time"], json!(0.0));

        let dog = &doc.nodes[1];
        assert_eq!(dog.labels, vec!["Entity", "Animal"]);
        assert_eq!(dog.properties["rank"], json!(2));
        assert!(!dog.properties.contains_key("labels"));
    }

    #[test]
    fn test_parse_applies_key_defaults() {
        let doc = parse_str(SAMPLE).expect("sample parses");
        assert_eq!(doc.nodes[0].properties["rank"], json!(7));
        assert_eq!(doc.nodes[2].properties["rank"], json!(7));
        assert!(doc.edges[0].properties.get("rank").is_none());
    }

    #[test]
    fn test_graph_level_defaults_stay_off_nodes_and_edges() {
        let xml = r#"<graphml>
  <key id="g0" for="graph" attr.name="created_by"><default>yEd</default></key>
  <key id="a0" attr.name="origin"><default>import</default></key>
  <graph edgedefault="directed">
    <node id="a"/>
    <node id="b"/>
    <edge source="a" target="b"/>
  </graph>
</graphml>"#;
        let doc = parse_str(xml).expect("document parses");

        for node in &doc.nodes {
            assert!(!node.properties.contains_key("created_by"));
            assert_eq!(node.properties["origin"], json!("import"));
        }
        assert!(!doc.edges[0].properties.contains_key("created_by"));
        assert_eq!(doc.edges[0].properties["origin"], json!("import"));
    }

    #[test]
    fn test_parse_edges_types_and_default_type() {
        let doc = parse_str(SAMPLE).expect("sample parses");
        assert_eq!(doc.edges.len(), 2);
        assert_eq!(doc.edges[0].rel_type, "MENTIONS");
        assert_eq!(doc.edges[0].id.as_deref(), Some("e0"));
        assert_eq!(doc.edges[0].properties["weight"], json!(0.5));
        assert_eq!(doc.edges[0].properties["hot"], json!(true));
        assert_eq!(doc.edges[1].rel_type, DEFAULT_REL_TYPE);
        assert!(doc.edges[1].id.is_none());
    }

    #[test]
    fn test_property_count() {
        let doc = parse_str(SAMPLE).expect("sample parses");
        // n0: name, content, start_time, rank; n1: name, rank; n2: rank; e0: weight, hot
        assert_eq!(doc.property_count(), 9);
    }

    #[test]
    fn test_rejects_non_graphml_root() {
        let err = parse_str("<root><node id=\"a\"/></root>").expect_err("not graphml");
        assert!(matches!(err, KgRagError::Import(_)));
        let err = parse_str("").expect_err("empty input");
        assert!(err.to_string().contains("not a GraphML document"));
    }

    #[test]
    fn test_rejects_dangling_edge() {
        let xml = r#"<graphml><graph><node id="a"/><edge source="a" target="b"/></graph></graphml>"#;
        let err = parse_str(xml).expect_err("dangling edge");
        assert!(err.to_string().contains("unknown node 'b'"));
    }

    #[test]
    fn test_rejects_duplicate_node_ids() {
        let xml = r#"<graphml><graph><node id="a"/><node id="a"/></graph></graphml>"#;
        assert!(parse_str(xml).is_err());
    }

    #[test]
    fn test_rejects_mismatched_tags() {
        let xml = r#"<graphml><graph><node id="a"></edge></graph></graphml>"#;
        assert!(parse_str(xml).is_err());
    }

    #[test]
    fn test_rejects_badly_typed_value() {
        let xml = r#"<graphml>
            <key id="k" for="node" attr.name="count" attr.type="int"/>
            <graph><node id="a"><data key="k">three</data></node></graph>
        </graphml>"#;
        let err = parse_str(xml).expect_err("bad int");
        assert!(err.to_string().contains("count"));
    }

    #[test]
    fn test_written_document_reads_back() {
        let doc = parse_str(SAMPLE).expect("sample parses");
        let xml = to_graphml(&doc);
        let reread = parse_str(&xml).expect("written graphml parses");
        assert_eq!(reread.nodes, doc.nodes);
        assert_eq!(reread.edges.len(), doc.edges.len());
        assert_eq!(reread.edges[0].properties, doc.edges[0].properties);
        assert_eq!(reread.edges[1].rel_type, DEFAULT_REL_TYPE);
    }

    #[tokio::test]
    async fn test_parse_file_missing() {
        let err = parse_file(Path::new("/definitely/not/here.graphml"))
            .await
            .expect_err("missing file");
        assert!(matches!(err, KgRagError::Import(_)));
    }
}
