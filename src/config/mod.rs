//! XML configuration loading.
//!
//! Parses the `<solver-interface>` document into plain structs and runs the
//! static checks that must fail before a participant reaches `Initialized`.
//! Tag names use pseudo-namespace prefixes (`data:scalar`,
//! `coupling-scheme:serial-implicit`); those are neutralized to plain names
//! before strict XML parsing.

use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};

use crate::cplscheme::{CouplingMode, TimesteppingMethod};
use crate::error::CouplingError;

/// Kind of a configured coupling scheme.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SchemeKind {
    SerialExplicit,
    SerialImplicit,
    ParallelExplicit,
    ParallelImplicit,
    Multi,
}

impl SchemeKind {
    pub fn mode(self) -> CouplingMode {
        match self {
            SchemeKind::SerialExplicit | SchemeKind::ParallelExplicit => CouplingMode::Explicit,
            _ => CouplingMode::Implicit,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DataConfig {
    pub name: String,
    /// 1 for scalar, space dimension for vector.
    pub components: usize,
    pub global: bool,
    /// Whether the field carries a gradient matrix next to its values.
    pub gradient: bool,
}

#[derive(Clone, Debug)]
pub struct MeshConfig {
    pub name: String,
    pub use_data: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ReceiveMeshConfig {
    pub name: String,
    pub from: String,
    pub safety_factor: f64,
    pub direct_access: bool,
}

#[derive(Clone, Debug)]
pub struct ReadWriteDataConfig {
    pub data: String,
    /// `None` addresses global data.
    pub mesh: Option<String>,
    /// Waveform interpolation order; read side only.
    pub waveform_order: usize,
}

#[derive(Clone, Debug)]
pub struct MappingConfig {
    pub kind: String,
    pub constraint: crate::mapping::MappingConstraint,
    pub from_mesh: String,
    pub to_mesh: String,
    pub timing: crate::mapping::MappingTiming,
}

#[derive(Clone, Debug)]
pub struct ParticipantConfig {
    pub name: String,
    pub provide_meshes: Vec<String>,
    pub receive_meshes: Vec<ReceiveMeshConfig>,
    pub read_data: Vec<ReadWriteDataConfig>,
    pub write_data: Vec<ReadWriteDataConfig>,
    pub mappings: Vec<MappingConfig>,
}

#[derive(Clone, Debug)]
pub struct M2NConfig {
    pub kind: String,
    pub from: String,
    pub to: String,
    /// Two-level initialization: the provider pre-filters mesh slices per
    /// receiver rank instead of broadcasting.
    pub two_level: bool,
}

#[derive(Clone, Debug)]
pub struct ExchangeConfig {
    pub data: String,
    /// `None` exchanges global data.
    pub mesh: Option<String>,
    pub from: String,
    pub to: String,
    pub initialize: bool,
}

#[derive(Clone, Debug)]
pub struct ConvergenceMeasureConfig {
    pub data: String,
    pub mesh: Option<String>,
    pub criterion: crate::cplscheme::Criterion,
    pub suffices: bool,
    pub strict: bool,
}

#[derive(Clone, Debug)]
pub struct AccelerationConfig {
    pub kind: String,
    pub initial_relaxation: f64,
    pub max_used_iterations: usize,
}

#[derive(Clone, Debug)]
pub struct CouplingSchemeConfig {
    pub kind: SchemeKind,
    pub max_time: Option<f64>,
    pub max_time_windows: Option<usize>,
    pub time_window_size: Option<f64>,
    pub method: TimesteppingMethod,
    pub valid_digits: u32,
    /// Serial/parallel: `[first, second]`. Multi: all participants, the
    /// controller flagged separately.
    pub participants: Vec<String>,
    pub controller: Option<String>,
    pub exchanges: Vec<ExchangeConfig>,
    pub max_iterations: Option<usize>,
    pub extrapolation_order: usize,
    pub convergence_measures: Vec<ConvergenceMeasureConfig>,
    pub acceleration: Option<AccelerationConfig>,
}

/// The fully parsed and statically validated configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub dimensions: usize,
    pub experimental: bool,
    pub output_directory: Option<PathBuf>,
    pub data: Vec<DataConfig>,
    pub meshes: Vec<MeshConfig>,
    pub participants: Vec<ParticipantConfig>,
    pub m2ns: Vec<M2NConfig>,
    pub coupling_schemes: Vec<CouplingSchemeConfig>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CouplingError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CouplingError::Xml(format!("cannot read configuration: {e}")))?;
        Self::from_str(&text)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(xml: &str) -> Result<Self, CouplingError> {
        let neutral = neutralize_tag_namespaces(xml);
        let doc = Document::parse(&neutral)
            .map_err(|e| CouplingError::Xml(format!("XML parse error: {e}")))?;
        let root = doc.root_element();
        if tag(&root) != ("solver-interface", None) {
            return Err(CouplingError::Xml(format!(
                "expected root element <solver-interface>, got <{}>",
                root.tag_name().name()
            )));
        }
        let dimensions: usize = parse_attr(&root, "dimensions")?
            .ok_or_else(|| CouplingError::Config("missing attribute dimensions".into()))?;
        if dimensions != 2 && dimensions != 3 {
            return Err(CouplingError::Config(format!(
                "dimensions must be 2 or 3, got {dimensions}"
            )));
        }
        let experimental = parse_attr(&root, "experimental")?.unwrap_or(false);
        let output_directory = root
            .attribute("output-directory")
            .map(PathBuf::from);

        let mut config = Config {
            dimensions,
            experimental,
            output_directory,
            data: Vec::new(),
            meshes: Vec::new(),
            participants: Vec::new(),
            m2ns: Vec::new(),
            coupling_schemes: Vec::new(),
        };

        for child in root.children().filter(Node::is_element) {
            match tag(&child) {
                ("data", Some(kind)) => config.data.push(parse_data(&child, kind, dimensions, false)?),
                ("global-data", Some(kind)) => {
                    config.data.push(parse_data(&child, kind, dimensions, true)?)
                }
                ("mesh", None) => config.meshes.push(parse_mesh(&child)?),
                ("participant", None) => config.participants.push(parse_participant(&child)?),
                ("m2n", kind) => config.m2ns.push(M2NConfig {
                    kind: kind.unwrap_or("local").to_string(),
                    from: required_attr(&child, "from")?,
                    to: required_attr(&child, "to")?,
                    two_level: parse_attr(&child, "two-level-initialization")?.unwrap_or(false),
                }),
                ("coupling-scheme", Some(kind)) => config
                    .coupling_schemes
                    .push(parse_coupling_scheme(&child, kind)?),
                (other, _) => {
                    return Err(CouplingError::Xml(format!(
                        "unexpected element <{other}> under <solver-interface>"
                    )))
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn data_config(&self, name: &str) -> Option<&DataConfig> {
        self.data.iter().find(|d| d.name == name)
    }

    pub fn mesh_config(&self, name: &str) -> Option<&MeshConfig> {
        self.meshes.iter().find(|m| m.name == name)
    }

    pub fn participant(&self, name: &str) -> Option<&ParticipantConfig> {
        self.participants.iter().find(|p| p.name == name)
    }

    fn validate(&self) -> Result<(), CouplingError> {
        // Unique names.
        for (i, d) in self.data.iter().enumerate() {
            if self.data[..i].iter().any(|o| o.name == d.name) {
                return Err(CouplingError::Config(format!(
                    "data \"{}\" is declared twice",
                    d.name
                )));
            }
        }
        for (i, m) in self.meshes.iter().enumerate() {
            if self.meshes[..i].iter().any(|o| o.name == m.name) {
                return Err(CouplingError::Config(format!(
                    "mesh \"{}\" is declared twice",
                    m.name
                )));
            }
        }
        for (i, p) in self.participants.iter().enumerate() {
            if self.participants[..i].iter().any(|o| o.name == p.name) {
                return Err(CouplingError::Config(format!(
                    "participant \"{}\" is declared twice",
                    p.name
                )));
            }
        }
        // Cross references.
        for m in &self.meshes {
            for d in &m.use_data {
                let data = self
                    .data
                    .iter()
                    .find(|dc| &dc.name == d)
                    .ok_or_else(|| CouplingError::Config(format!(
                        "mesh \"{}\" uses unknown data \"{d}\"",
                        m.name
                    )))?;
                if data.global {
                    return Err(CouplingError::Config(format!(
                        "mesh \"{}\" cannot use global data \"{d}\"",
                        m.name
                    )));
                }
            }
        }
        for p in &self.participants {
            for name in &p.provide_meshes {
                if self.mesh_config(name).is_none() {
                    return Err(CouplingError::UnknownMesh(name.clone()));
                }
            }
            for r in &p.receive_meshes {
                if self.mesh_config(&r.name).is_none() {
                    return Err(CouplingError::UnknownMesh(r.name.clone()));
                }
                if self.participant(&r.from).is_none() {
                    return Err(CouplingError::UnknownParticipant(r.from.clone()));
                }
            }
            for rw in p.read_data.iter().chain(&p.write_data) {
                match &rw.mesh {
                    Some(mesh) => {
                        let mc = self
                            .mesh_config(mesh)
                            .ok_or_else(|| CouplingError::UnknownMesh(mesh.clone()))?;
                        if !mc.use_data.contains(&rw.data) {
                            return Err(CouplingError::UnknownData {
                                mesh: mesh.clone(),
                                data: rw.data.clone(),
                            });
                        }
                    }
                    None => {
                        let ok = self
                            .data_config(&rw.data)
                            .map(|d| d.global)
                            .unwrap_or(false);
                        if !ok {
                            return Err(CouplingError::UnknownGlobalData(rw.data.clone()));
                        }
                    }
                }
            }
            for m in &p.mappings {
                let known = |name: &str| {
                    p.provide_meshes.iter().any(|x| x == name)
                        || p.receive_meshes.iter().any(|x| x.name == name)
                };
                if !known(&m.from_mesh) || !known(&m.to_mesh) {
                    return Err(CouplingError::Config(format!(
                        "mapping of participant \"{}\" references a mesh it neither provides nor receives",
                        p.name
                    )));
                }
            }
        }
        for scheme in &self.coupling_schemes {
            self.validate_scheme(scheme)?;
        }
        Ok(())
    }

    fn validate_scheme(&self, scheme: &CouplingSchemeConfig) -> Result<(), CouplingError> {
        for name in &scheme.participants {
            if self.participant(name).is_none() {
                return Err(CouplingError::UnknownParticipant(name.clone()));
            }
        }
        match scheme.method {
            TimesteppingMethod::FixedWindowSize => {
                if scheme.time_window_size.is_none() {
                    return Err(CouplingError::Config(
                        "time-window-size needs a value with the fixed method".into(),
                    ));
                }
            }
            TimesteppingMethod::FirstParticipantSets => {
                if scheme.time_window_size.is_some() {
                    return Err(CouplingError::Config(
                        "the first-participant method announces the window size at runtime; remove the configured value".into(),
                    ));
                }
                // The second participant may only sample at the window end,
                // so time interpolation on its read data cannot work.
                if let Some(second) = scheme.participants.get(1) {
                    if let Some(p) = self.participant(second) {
                        if p.read_data.iter().any(|r| r.waveform_order > 0) {
                            return Err(CouplingError::Config(format!(
                                "participant \"{second}\" receives the time window size and cannot use waveform interpolation on read data",
                            )));
                        }
                    }
                }
            }
        }
        if scheme.kind.mode() == CouplingMode::Implicit {
            if scheme.max_iterations.is_none() {
                return Err(CouplingError::Config(
                    "implicit coupling schemes need max-iterations".into(),
                ));
            }
            if scheme.convergence_measures.is_empty() {
                return Err(CouplingError::MissingConvergenceMeasure);
            }
        } else if scheme.max_iterations.is_some() || !scheme.convergence_measures.is_empty() {
            return Err(CouplingError::Config(
                "explicit coupling schemes have neither iterations nor convergence measures"
                    .into(),
            ));
        }
        if scheme.extrapolation_order > 1 {
            return Err(CouplingError::InvalidExtrapolationOrder(
                scheme.extrapolation_order,
            ));
        }
        for ex in &scheme.exchanges {
            if self.participant(&ex.from).is_none() {
                return Err(CouplingError::UnknownParticipant(ex.from.clone()));
            }
            if self.participant(&ex.to).is_none() {
                return Err(CouplingError::UnknownParticipant(ex.to.clone()));
            }
            match &ex.mesh {
                Some(mesh) => {
                    let mc = self
                        .mesh_config(mesh)
                        .ok_or_else(|| CouplingError::UnknownMesh(mesh.clone()))?;
                    if !mc.use_data.contains(&ex.data) {
                        return Err(CouplingError::UnknownData {
                            mesh: mesh.clone(),
                            data: ex.data.clone(),
                        });
                    }
                }
                None => {
                    let ok = self
                        .data_config(&ex.data)
                        .map(|d| d.global)
                        .unwrap_or(false);
                    if !ok {
                        return Err(CouplingError::UnknownGlobalData(ex.data.clone()));
                    }
                }
            }
        }
        for cm in &scheme.convergence_measures {
            match &cm.mesh {
                Some(mesh) => {
                    let mc = self
                        .mesh_config(mesh)
                        .ok_or_else(|| CouplingError::UnknownMesh(mesh.clone()))?;
                    if !mc.use_data.contains(&cm.data) {
                        return Err(CouplingError::UnknownData {
                            mesh: mesh.clone(),
                            data: cm.data.clone(),
                        });
                    }
                }
                None => {
                    let ok = self
                        .data_config(&cm.data)
                        .map(|d| d.global)
                        .unwrap_or(false);
                    if !ok {
                        return Err(CouplingError::Config(format!(
                            "convergence measure references unknown data \"{}\"",
                            cm.data
                        )));
                    }
                }
            }
        }
        if scheme.kind == SchemeKind::Multi && scheme.controller.is_none() {
            return Err(CouplingError::Config(
                "a multi coupling scheme needs a controlling participant".into(),
            ));
        }
        Ok(())
    }
}

// --- element parsers ---

/// Split a neutralized tag name `prefix.suffix` into its parts.
fn tag<'a>(node: &'a Node) -> (&'a str, Option<&'a str>) {
    let name = node.tag_name().name();
    match name.split_once('.') {
        Some((a, b)) => (a, Some(b)),
        None => (name, None),
    }
}

fn required_attr(node: &Node, name: &str) -> Result<String, CouplingError> {
    node.attribute(name).map(str::to_string).ok_or_else(|| {
        CouplingError::Config(format!(
            "element <{}> is missing attribute \"{name}\"",
            node.tag_name().name()
        ))
    })
}

fn parse_attr<T: std::str::FromStr>(
    node: &Node,
    name: &str,
) -> Result<Option<T>, CouplingError> {
    match node.attribute(name) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            CouplingError::Config(format!(
                "attribute \"{name}\" of <{}> has invalid value \"{raw}\"",
                node.tag_name().name()
            ))
        }),
    }
}

fn parse_data(
    node: &Node,
    kind: &str,
    dimensions: usize,
    global: bool,
) -> Result<DataConfig, CouplingError> {
    let components = match kind {
        "scalar" => 1,
        "vector" => dimensions,
        other => {
            return Err(CouplingError::Config(format!(
                "unknown data kind \"{other}\""
            )))
        }
    };
    Ok(DataConfig {
        name: required_attr(node, "name")?,
        components,
        global,
        gradient: parse_attr(node, "gradient")?.unwrap_or(false),
    })
}

fn parse_mesh(node: &Node) -> Result<MeshConfig, CouplingError> {
    let mut use_data = Vec::new();
    for child in node.children().filter(Node::is_element) {
        match tag(&child) {
            ("use-data", None) => use_data.push(required_attr(&child, "name")?),
            (other, _) => {
                return Err(CouplingError::Xml(format!(
                    "unexpected element <{other}> under <mesh>"
                )))
            }
        }
    }
    Ok(MeshConfig {
        name: required_attr(node, "name")?,
        use_data,
    })
}

fn parse_participant(node: &Node) -> Result<ParticipantConfig, CouplingError> {
    let mut p = ParticipantConfig {
        name: required_attr(node, "name")?,
        provide_meshes: Vec::new(),
        receive_meshes: Vec::new(),
        read_data: Vec::new(),
        write_data: Vec::new(),
        mappings: Vec::new(),
    };
    for child in node.children().filter(Node::is_element) {
        match tag(&child) {
            ("provide-mesh", None) => p.provide_meshes.push(required_attr(&child, "name")?),
            ("receive-mesh", None) => p.receive_meshes.push(ReceiveMeshConfig {
                name: required_attr(&child, "name")?,
                from: required_attr(&child, "from")?,
                safety_factor: parse_attr(&child, "safety-factor")?.unwrap_or(0.5),
                direct_access: parse_attr(&child, "direct-access")?.unwrap_or(false),
            }),
            ("read-data", None) => p.read_data.push(ReadWriteDataConfig {
                data: required_attr(&child, "name")?,
                mesh: child.attribute("mesh").map(str::to_string),
                waveform_order: parse_attr(&child, "waveform-order")?.unwrap_or(0),
            }),
            ("write-data", None) => p.write_data.push(ReadWriteDataConfig {
                data: required_attr(&child, "name")?,
                mesh: child.attribute("mesh").map(str::to_string),
                waveform_order: 0,
            }),
            ("mapping", Some(kind)) => {
                let constraint = match child.attribute("constraint") {
                    Some("consistent") | None => crate::mapping::MappingConstraint::Consistent,
                    Some("conservative") => crate::mapping::MappingConstraint::Conservative,
                    Some(other) => {
                        return Err(CouplingError::Config(format!(
                            "unknown mapping constraint \"{other}\""
                        )))
                    }
                };
                let timing = match child.attribute("timing") {
                    Some("initial") => crate::mapping::MappingTiming::Initial,
                    Some("onadvance") | None => crate::mapping::MappingTiming::OnAdvance,
                    Some(other) => {
                        return Err(CouplingError::Config(format!(
                            "unknown mapping timing \"{other}\""
                        )))
                    }
                };
                p.mappings.push(MappingConfig {
                    kind: kind.to_string(),
                    constraint,
                    from_mesh: required_attr(&child, "from")?,
                    to_mesh: required_attr(&child, "to")?,
                    timing,
                });
            }
            (other, _) => {
                return Err(CouplingError::Xml(format!(
                    "unexpected element <{other}> under <participant>"
                )))
            }
        }
    }
    Ok(p)
}

fn parse_coupling_scheme(
    node: &Node,
    kind: &str,
) -> Result<CouplingSchemeConfig, CouplingError> {
    let kind = match kind {
        "serial-explicit" => SchemeKind::SerialExplicit,
        "serial-implicit" => SchemeKind::SerialImplicit,
        "parallel-explicit" => SchemeKind::ParallelExplicit,
        "parallel-implicit" => SchemeKind::ParallelImplicit,
        "multi" => SchemeKind::Multi,
        other => {
            return Err(CouplingError::Config(format!(
                "unknown coupling scheme kind \"{other}\""
            )))
        }
    };
    let mut scheme = CouplingSchemeConfig {
        kind,
        max_time: None,
        max_time_windows: None,
        time_window_size: None,
        method: TimesteppingMethod::FixedWindowSize,
        valid_digits: 10,
        participants: Vec::new(),
        controller: None,
        exchanges: Vec::new(),
        max_iterations: None,
        extrapolation_order: 0,
        convergence_measures: Vec::new(),
        acceleration: None,
    };
    for child in node.children().filter(Node::is_element) {
        match tag(&child) {
            ("max-time", None) => scheme.max_time = parse_attr(&child, "value")?,
            ("max-time-windows", None) => scheme.max_time_windows = parse_attr(&child, "value")?,
            ("time-window-size", None) => {
                scheme.time_window_size = parse_attr(&child, "value")?;
                scheme.method = match child.attribute("method") {
                    Some("fixed") | None => TimesteppingMethod::FixedWindowSize,
                    Some("first-participant") => TimesteppingMethod::FirstParticipantSets,
                    Some(other) => {
                        return Err(CouplingError::Config(format!(
                            "unknown timestepping method \"{other}\""
                        )))
                    }
                };
                if let Some(digits) = parse_attr(&child, "valid-digits")? {
                    scheme.valid_digits = digits;
                }
            }
            ("participants", None) => {
                scheme.participants = vec![
                    required_attr(&child, "first")?,
                    required_attr(&child, "second")?,
                ];
            }
            ("participant", None) => {
                let name = required_attr(&child, "name")?;
                if parse_attr(&child, "control")?.unwrap_or(false) {
                    scheme.controller = Some(name.clone());
                }
                scheme.participants.push(name);
            }
            ("exchange", None) => scheme.exchanges.push(ExchangeConfig {
                data: required_attr(&child, "data")?,
                mesh: child.attribute("mesh").map(str::to_string),
                from: required_attr(&child, "from")?,
                to: required_attr(&child, "to")?,
                initialize: parse_attr(&child, "initialize")?.unwrap_or(false),
            }),
            ("max-iterations", None) => scheme.max_iterations = parse_attr(&child, "value")?,
            ("extrapolation-order", None) => {
                scheme.extrapolation_order = parse_attr(&child, "value")?.unwrap_or(0)
            }
            ("absolute-convergence-measure", None) => {
                scheme.convergence_measures.push(parse_measure(
                    &child,
                    crate::cplscheme::Criterion::Absolute {
                        limit: parse_attr(&child, "limit")?.ok_or_else(|| {
                            CouplingError::Config("convergence measure needs a limit".into())
                        })?,
                    },
                )?)
            }
            ("relative-convergence-measure", None) => {
                scheme.convergence_measures.push(parse_measure(
                    &child,
                    crate::cplscheme::Criterion::Relative {
                        limit: parse_attr(&child, "limit")?.ok_or_else(|| {
                            CouplingError::Config("convergence measure needs a limit".into())
                        })?,
                    },
                )?)
            }
            ("residual-relative-convergence-measure", None) => {
                scheme.convergence_measures.push(parse_measure(
                    &child,
                    crate::cplscheme::Criterion::ResidualRelative {
                        limit: parse_attr(&child, "limit")?.ok_or_else(|| {
                            CouplingError::Config("convergence measure needs a limit".into())
                        })?,
                    },
                )?)
            }
            ("acceleration", Some(accel_kind)) => {
                let mut initial_relaxation = 0.1;
                let mut max_used_iterations = 100;
                for sub in child.children().filter(Node::is_element) {
                    match tag(&sub) {
                        ("relaxation", None) | ("initial-relaxation", None) => {
                            if let Some(v) = parse_attr(&sub, "value")? {
                                initial_relaxation = v;
                            }
                        }
                        ("max-used-iterations", None) => {
                            if let Some(v) = parse_attr(&sub, "value")? {
                                max_used_iterations = v;
                            }
                        }
                        (other, _) => {
                            return Err(CouplingError::Xml(format!(
                                "unexpected element <{other}> under <acceleration>"
                            )))
                        }
                    }
                }
                scheme.acceleration = Some(AccelerationConfig {
                    kind: accel_kind.to_string(),
                    initial_relaxation,
                    max_used_iterations,
                });
            }
            (other, _) => {
                return Err(CouplingError::Xml(format!(
                    "unexpected element <{other}> under <coupling-scheme>"
                )))
            }
        }
    }
    Ok(scheme)
}

fn parse_measure(
    node: &Node,
    criterion: crate::cplscheme::Criterion,
) -> Result<ConvergenceMeasureConfig, CouplingError> {
    Ok(ConvergenceMeasureConfig {
        data: required_attr(node, "data")?,
        mesh: node.attribute("mesh").map(str::to_string),
        criterion,
        suffices: parse_attr(node, "suffices")?.unwrap_or(false),
        strict: parse_attr(node, "strict")?.unwrap_or(false),
    })
}

/// Replace `:` with `.` inside tag names so pseudo-namespace prefixes pass
/// strict XML parsing. Attribute values, text, comments, and processing
/// instructions are left untouched.
fn neutralize_tag_namespaces(xml: &str) -> String {
    let bytes = xml.as_bytes();
    let mut out = String::with_capacity(xml.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        out.push(c);
        if c == '<' && i + 1 < bytes.len() && bytes[i + 1] != b'!' && bytes[i + 1] != b'?' {
            // Copy the tag name, swapping the namespace separator.
            let mut j = i + 1;
            if bytes[j] == b'/' {
                out.push('/');
                j += 1;
            }
            while j < bytes.len() {
                match bytes[j] {
                    b':' => out.push('.'),
                    b'>' | b'/' | b' ' | b'\t' | b'\n' | b'\r' => break,
                    other => out.push(other as char),
                }
                j += 1;
            }
            i = j;
            continue;
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
      <solver-interface dimensions="2">
        <data:scalar name="P" />
        <mesh name="M"><use-data name="P" /></mesh>
        <participant name="A"><provide-mesh name="M" /><write-data name="P" mesh="M" /></participant>
        <participant name="B">
          <receive-mesh name="M" from="A" />
          <read-data name="P" mesh="M" />
        </participant>
        <m2n:local from="A" to="B" />
        <coupling-scheme:serial-explicit>
          <max-time value="1.0" />
          <time-window-size value="0.5" />
          <participants first="A" second="B" />
          <exchange data="P" mesh="M" from="A" to="B" />
        </coupling-scheme:serial-explicit>
      </solver-interface>
    "#;

    #[test]
    fn minimal_parses() {
        let cfg = Config::from_str(MINIMAL).unwrap();
        assert_eq!(cfg.dimensions, 2);
        assert_eq!(cfg.data.len(), 1);
        assert_eq!(cfg.meshes[0].use_data, vec!["P"]);
        assert_eq!(cfg.coupling_schemes.len(), 1);
        let scheme = &cfg.coupling_schemes[0];
        assert_eq!(scheme.kind, SchemeKind::SerialExplicit);
        assert_eq!(scheme.participants, vec!["A", "B"]);
        assert_eq!(scheme.time_window_size, Some(0.5));
    }

    #[test]
    fn unknown_mesh_reference_fails() {
        let xml = MINIMAL.replace("<provide-mesh name=\"M\" />", "<provide-mesh name=\"X\" />");
        assert!(matches!(
            Config::from_str(&xml).unwrap_err(),
            CouplingError::UnknownMesh(_)
        ));
    }

    #[test]
    fn duplicate_data_fails() {
        let xml = MINIMAL.replace(
            "<data:scalar name=\"P\" />",
            "<data:scalar name=\"P\" /><data:scalar name=\"P\" />",
        );
        let err = Config::from_str(&xml).unwrap_err();
        assert!(matches!(err, CouplingError::Config(_)));
    }

    #[test]
    fn implicit_needs_measures() {
        let xml = MINIMAL
            .replace("serial-explicit", "serial-implicit")
            .replace(
                "<participants first=\"A\" second=\"B\" />",
                "<participants first=\"A\" second=\"B\" /><max-iterations value=\"10\" />",
            );
        assert!(matches!(
            Config::from_str(&xml).unwrap_err(),
            CouplingError::MissingConvergenceMeasure
        ));
    }

    #[test]
    fn first_participant_method_rejects_fixed_value() {
        let xml = MINIMAL.replace(
            "<time-window-size value=\"0.5\" />",
            "<time-window-size value=\"0.5\" method=\"first-participant\" />",
        );
        assert!(Config::from_str(&xml).is_err());
    }

    #[test]
    fn first_participant_method_rejects_waveform_reads() {
        let xml = MINIMAL
            .replace(
                "<time-window-size value=\"0.5\" />",
                "<time-window-size method=\"first-participant\" />",
            )
            .replace(
                "<read-data name=\"P\" mesh=\"M\" />",
                "<read-data name=\"P\" mesh=\"M\" waveform-order=\"1\" />",
            );
        assert!(Config::from_str(&xml).is_err());
    }

    #[test]
    fn dimensions_are_checked() {
        let xml = MINIMAL.replace("dimensions=\"2\"", "dimensions=\"4\"");
        assert!(Config::from_str(&xml).is_err());
    }

    #[test]
    fn namespace_neutralization_leaves_attributes_alone() {
        let out = neutralize_tag_namespaces("<m2n:local from=\"a:b\" />");
        assert_eq!(out, "<m2n.local from=\"a:b\" />");
    }
}
