//! Assembly of a participant's runtime state from the parsed
//! configuration: store, contexts, connections, coupling scheme.

use std::path::PathBuf;
use std::sync::Arc;

use hashbrown::HashMap;

use super::context::{
    DataContext, DataDirection, MappingContext, MeshContext, MeshDirection,
};
use crate::acceleration::{
    Acceleration, AitkenAcceleration, ConstantRelaxation, IqnIlsAcceleration,
};
use crate::com::{Channel, IntraComm, LocalComm, M2N};
use crate::config::{
    AccelerationConfig, Config, CouplingSchemeConfig, MappingConfig, ParticipantConfig,
    SchemeKind,
};
use crate::cplscheme::{
    CompositionalScheme, ConvergenceMeasure, CouplingScheme, DataLocation, MeasureContext,
    MultiScheme, ParallelScheme, SchemeParams, SerialScheme,
};
use crate::error::CouplingError;
use crate::mapping::{Mapping, NearestNeighborMapping};
use crate::mesh::{
    DataId, DataStore, GlobalData, Mesh, MeshId, MeshRequirement,
};
use crate::partition::{GeometricFilter, ProvidedPartition, ReceivedPartition};
use crate::waveform::Waveform;

/// Everything `SolverInterface` owns, assembled from one configuration.
pub(super) struct Assembly {
    pub store: DataStore,
    pub mesh_contexts: Vec<MeshContext>,
    pub data_contexts: Vec<DataContext>,
    pub mappings: Vec<MappingContext>,
    pub scheme: CouplingScheme,
    pub intra: IntraComm,
    /// Peer name -> connection, in name order for deterministic shutdown.
    pub m2ns: Vec<(String, Arc<M2N>)>,
    pub output_dir: PathBuf,
    pub two_level: bool,
}

pub(super) fn assemble(
    config: &Config,
    participant: &str,
    rank: usize,
    size: usize,
) -> Result<Assembly, CouplingError> {
    let me = config
        .participant(participant)
        .ok_or_else(|| CouplingError::UnknownParticipant(participant.to_string()))?;
    let output_dir = config
        .output_directory
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    // --- store: all meshes (ids = declaration order), data per use-data ---
    let mut store = DataStore::new();
    let mut data_ids: HashMap<(String, String), DataId> = HashMap::new();
    let mut next_data = 0u32;
    for (i, mc) in config.meshes.iter().enumerate() {
        let mut mesh = Mesh::new(&mc.name, MeshId::new(i as u32), config.dimensions);
        for dname in &mc.use_data {
            let dc = config
                .data_config(dname)
                .expect("validated use-data reference");
            let id = DataId::new(next_data);
            next_data += 1;
            mesh.add_data(dname, id, dc.components, dc.gradient);
            data_ids.insert((mc.name.clone(), dname.clone()), id);
        }
        store.insert_mesh(mesh);
    }
    for dc in config.data.iter().filter(|d| d.global) {
        let id = DataId::new(next_data);
        next_data += 1;
        store.insert_global(GlobalData::new(&dc.name, id, dc.components));
        data_ids.insert((String::new(), dc.name.clone()), id);
    }
    let mesh_id = |name: &str| -> MeshId {
        MeshId::new(
            config
                .meshes
                .iter()
                .position(|m| m.name == name)
                .expect("validated mesh reference") as u32,
        )
    };
    let data_id = |mesh: Option<&str>, data: &str| -> DataId {
        data_ids[&(mesh.unwrap_or("").to_string(), data.to_string())]
    };

    // --- intra communicator ---
    let intra = build_intra(participant, rank, size);

    // --- m2n connections for every peer this participant couples with ---
    let two_level = config.m2ns.iter().any(|m| m.two_level);
    let mut peers: Vec<String> = Vec::new();
    for m2n in &config.m2ns {
        let peer = if m2n.from == participant {
            Some(m2n.to.clone())
        } else if m2n.to == participant {
            Some(m2n.from.clone())
        } else {
            None
        };
        if let Some(peer) = peer {
            if m2n.kind != "local" {
                return Err(CouplingError::Config(format!(
                    "m2n transport \"{}\" is not available in this build; use m2n:local",
                    m2n.kind
                )));
            }
            if !peers.contains(&peer) {
                peers.push(peer);
            }
        }
    }
    peers.sort();
    let m2ns: Vec<(String, Arc<M2N>)> = peers
        .into_iter()
        .map(|peer| {
            let label = |p: &str| format!("{p}#{rank}");
            let channel =
                Channel::Local(LocalComm::connect(&label(participant), &label(&peer)));
            (peer, Arc::new(M2N::new(channel)))
        })
        .collect();
    let m2n_to = |peer: &str| -> Result<Arc<M2N>, CouplingError> {
        m2ns.iter()
            .find(|(name, _)| name == peer)
            .map(|(_, m)| m.clone())
            .ok_or_else(|| {
                CouplingError::Config(format!(
                    "no m2n connection configured between \"{participant}\" and \"{peer}\""
                ))
            })
    };

    // --- mesh contexts ---
    let mut mesh_contexts = Vec::new();
    for name in &me.provide_meshes {
        let id = mesh_id(name);
        let requirement = global_requirement(config, name);
        mesh_contexts.push(MeshContext {
            mesh: id,
            name: name.clone(),
            direction: MeshDirection::Provide,
            requirement,
            locked: false,
            access_region_set: false,
            provided: Some(ProvidedPartition::new(requirement)),
            received: None,
            receivers: receivers_of(config, participant, name),
        });
    }
    for rm in &me.receive_meshes {
        let id = mesh_id(&rm.name);
        // Both endpoints derive the same requirement, so the connectivity
        // part of the mesh payload stays wire-compatible.
        let requirement = global_requirement(config, &rm.name);
        let filter = if two_level {
            GeometricFilter::OnProvider
        } else {
            GeometricFilter::OnReceiver
        };
        mesh_contexts.push(MeshContext {
            mesh: id,
            name: rm.name.clone(),
            direction: MeshDirection::ReceiveFrom(rm.from.clone()),
            requirement,
            locked: false,
            access_region_set: false,
            provided: None,
            received: Some(ReceivedPartition::new(
                filter,
                rm.safety_factor,
                rm.direct_access,
            )),
            receivers: Vec::new(),
        });
    }

    // --- data contexts ---
    let mut data_contexts = Vec::new();
    for rw in &me.read_data {
        let id = data_id(rw.mesh.as_deref(), &rw.data);
        let components = match &rw.mesh {
            Some(m) => store
                .mesh(mesh_id(m))
                .data(id)
                .expect("validated data reference")
                .components(),
            None => store.global(id).expect("validated data reference").components(),
        };
        data_contexts.push(DataContext {
            data: id,
            name: rw.data.clone(),
            mesh: rw.mesh.as_deref().map(mesh_id),
            components,
            direction: DataDirection::Read,
            waveform: Some(Waveform::new(rw.waveform_order)),
            waveform_order: rw.waveform_order,
        });
    }
    for rw in &me.write_data {
        let id = data_id(rw.mesh.as_deref(), &rw.data);
        let components = match &rw.mesh {
            Some(m) => store
                .mesh(mesh_id(m))
                .data(id)
                .expect("validated data reference")
                .components(),
            None => store.global(id).expect("validated data reference").components(),
        };
        data_contexts.push(DataContext {
            data: id,
            name: rw.data.clone(),
            mesh: rw.mesh.as_deref().map(mesh_id),
            components,
            direction: DataDirection::Write,
            waveform: None,
            waveform_order: 0,
        });
    }

    // --- mapping contexts ---
    let mut mappings = Vec::new();
    for mc in &me.mappings {
        mappings.push(build_mapping(config, me, mc, &mesh_id, &data_id)?);
    }

    // --- coupling scheme(s) ---
    let mut schemes = Vec::new();
    for sc in config
        .coupling_schemes
        .iter()
        .filter(|sc| sc.participants.iter().any(|p| p == participant))
    {
        schemes.push(build_scheme(
            config,
            sc,
            participant,
            &output_dir,
            &m2n_to,
            &mesh_id,
            &data_id,
        )?);
    }
    let scheme = match schemes.len() {
        0 => {
            return Err(CouplingError::Config(format!(
                "participant \"{participant}\" is not part of any coupling scheme"
            )))
        }
        1 => schemes.pop().expect("one scheme"),
        _ => CouplingScheme::Compositional(CompositionalScheme::new(schemes)?),
    };

    Ok(Assembly {
        store,
        mesh_contexts,
        data_contexts,
        mappings,
        scheme,
        intra,
        m2ns,
        output_dir,
        two_level,
    })
}

fn build_intra(participant: &str, rank: usize, size: usize) -> IntraComm {
    if size <= 1 {
        return IntraComm::Serial;
    }
    if rank == 0 {
        let to_secondaries = (1..size)
            .map(|r| {
                Channel::Local(LocalComm::connect(
                    &format!("{participant}.intra.0.{r}"),
                    &format!("{participant}.intra.{r}.0"),
                ))
            })
            .collect();
        IntraComm::Primary { to_secondaries }
    } else {
        IntraComm::Secondary {
            rank,
            to_primary: Channel::Local(LocalComm::connect(
                &format!("{participant}.intra.{rank}.0"),
                &format!("{participant}.intra.0.{rank}"),
            )),
        }
    }
}

/// Connectivity a participant's own mappings demand for one of its meshes.
fn own_requirement(p: &ParticipantConfig, mesh: &str) -> MeshRequirement {
    let needs_full = p.mappings.iter().any(|m| {
        (m.from_mesh == mesh || m.to_mesh == mesh) && m.kind != "nearest-neighbor"
    });
    if needs_full {
        MeshRequirement::Full
    } else {
        MeshRequirement::Vertex
    }
}

/// Requirement merged over every participant touching the mesh; identical
/// on the provider and all receivers.
fn global_requirement(config: &Config, mesh: &str) -> MeshRequirement {
    let mut req = MeshRequirement::Vertex;
    for p in &config.participants {
        let uses = p.provide_meshes.iter().any(|m| m == mesh)
            || p.receive_meshes.iter().any(|r| r.name == mesh);
        if uses {
            req = req.max(own_requirement(p, mesh));
        }
    }
    req
}

/// Participants receiving `mesh` from `provider`, in name order.
fn receivers_of(config: &Config, provider: &str, mesh: &str) -> Vec<String> {
    let mut out: Vec<String> = config
        .participants
        .iter()
        .filter(|p| {
            p.receive_meshes
                .iter()
                .any(|r| r.name == mesh && r.from == provider)
        })
        .map(|p| p.name.clone())
        .collect();
    out.sort();
    out
}

fn build_mapping(
    config: &Config,
    me: &ParticipantConfig,
    mc: &MappingConfig,
    mesh_id: &impl Fn(&str) -> MeshId,
    data_id: &impl Fn(Option<&str>, &str) -> DataId,
) -> Result<MappingContext, CouplingError> {
    let kernel: Box<dyn Mapping> = match mc.kind.as_str() {
        "nearest-neighbor" => Box::new(NearestNeighborMapping::new(mc.constraint)),
        other => {
            return Err(CouplingError::Config(format!(
                "mapping kernel \"{other}\" is not available"
            )))
        }
    };
    let from_provided = me.provide_meshes.iter().any(|m| m == &mc.from_mesh);
    let to_provided = me.provide_meshes.iter().any(|m| m == &mc.to_mesh);
    let direction = match (from_provided, to_provided) {
        (true, false) => DataDirection::Write,
        (false, true) => DataDirection::Read,
        _ => {
            return Err(CouplingError::Config(format!(
                "mapping from \"{}\" to \"{}\" must connect a provided mesh with a received one",
                mc.from_mesh, mc.to_mesh
            )))
        }
    };
    // Pair data shared by both meshes and accessed in the mapped direction.
    let from_cfg = config.mesh_config(&mc.from_mesh).expect("validated");
    let to_cfg = config.mesh_config(&mc.to_mesh).expect("validated");
    let accessed: Vec<&str> = match direction {
        DataDirection::Write => me.write_data.iter().map(|w| w.data.as_str()).collect(),
        DataDirection::Read => me.read_data.iter().map(|r| r.data.as_str()).collect(),
    };
    let mut pairs = Vec::new();
    for name in &from_cfg.use_data {
        if to_cfg.use_data.contains(name) && accessed.contains(&name.as_str()) {
            pairs.push((
                data_id(Some(&mc.from_mesh), name),
                data_id(Some(&mc.to_mesh), name),
            ));
        }
    }
    if pairs.is_empty() {
        return Err(CouplingError::Config(format!(
            "mapping from \"{}\" to \"{}\" moves no data; check use-data and read/write declarations",
            mc.from_mesh, mc.to_mesh
        )));
    }
    Ok(MappingContext {
        mapping: kernel,
        from_mesh: mesh_id(&mc.from_mesh),
        to_mesh: mesh_id(&mc.to_mesh),
        timing: mc.timing,
        direction,
        pairs,
        has_mapped_data: false,
    })
}

fn build_acceleration(cfg: &AccelerationConfig) -> Result<Box<dyn Acceleration>, CouplingError> {
    match cfg.kind.as_str() {
        "constant" => Ok(Box::new(ConstantRelaxation::new(cfg.initial_relaxation))),
        "aitken" => Ok(Box::new(AitkenAcceleration::new(cfg.initial_relaxation))),
        "IQN-ILS" => Ok(Box::new(IqnIlsAcceleration::new(
            cfg.initial_relaxation,
            cfg.max_used_iterations,
        ))),
        other => Err(CouplingError::Config(format!(
            "acceleration kind \"{other}\" is not available"
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_scheme(
    config: &Config,
    sc: &CouplingSchemeConfig,
    participant: &str,
    output_dir: &std::path::Path,
    m2n_to: &impl Fn(&str) -> Result<Arc<M2N>, CouplingError>,
    mesh_id: &impl Fn(&str) -> MeshId,
    data_id: &impl Fn(Option<&str>, &str) -> DataId,
) -> Result<CouplingScheme, CouplingError> {
    let params = SchemeParams {
        max_time: sc.max_time,
        max_time_windows: sc.max_time_windows,
        time_window_size: sc.time_window_size,
        valid_digits: sc.valid_digits,
        local_participant: participant.to_string(),
        mode: sc.kind.mode(),
        max_iterations: sc.max_iterations,
        extrapolation_order: sc.extrapolation_order,
        log_dir: match sc.kind.mode() {
            crate::cplscheme::CouplingMode::Implicit => Some(output_dir.to_path_buf()),
            crate::cplscheme::CouplingMode::Explicit => None,
        },
    };

    let exchange_parts = |ex: &crate::config::ExchangeConfig| {
        let id = data_id(ex.mesh.as_deref(), &ex.data);
        let (location, components, gradient) = match &ex.mesh {
            Some(m) => {
                let dc = config.data_config(&ex.data).expect("validated");
                (
                    DataLocation::Mesh(mesh_id(m)),
                    dc.components,
                    dc.gradient,
                )
            }
            None => {
                let dc = config.data_config(&ex.data).expect("validated");
                (DataLocation::Global, dc.components, false)
            }
        };
        (id, location, components, gradient)
    };

    let measure_contexts = |sc: &CouplingSchemeConfig| -> Vec<MeasureContext> {
        sc.convergence_measures
            .iter()
            .map(|cm| MeasureContext {
                data: data_id(cm.mesh.as_deref(), &cm.data),
                data_name: cm.data.clone(),
                suffices: cm.suffices,
                strict: cm.strict,
                does_logging: true,
                measure: ConvergenceMeasure::new(cm.criterion),
            })
            .collect()
    };

    match sc.kind {
        SchemeKind::Multi => {
            let mut scheme = MultiScheme::new(
                params,
                sc.controller.clone().expect("validated controller"),
            )?;
            let controller = sc.controller.as_deref().expect("validated controller");
            let is_controller = participant == controller;
            if is_controller {
                let mut others: Vec<&String> = sc
                    .participants
                    .iter()
                    .filter(|p| p.as_str() != participant)
                    .collect();
                others.sort();
                others.dedup();
                for peer in others {
                    scheme.add_peer(peer, m2n_to(peer)?);
                }
            } else {
                scheme.add_peer(controller, m2n_to(controller)?);
            }
            for ex in &sc.exchanges {
                let (id, location, components, gradient) = exchange_parts(ex);
                if ex.from == participant {
                    scheme.add_data_to_send(
                        &ex.to, id, location, components, gradient, ex.initialize, &ex.data,
                    )?;
                } else if ex.to == participant {
                    scheme.add_data_to_receive(
                        &ex.from, id, location, components, gradient, ex.initialize, &ex.data,
                    )?;
                }
            }
            if is_controller {
                for ctx in measure_contexts(sc) {
                    scheme.add_convergence_measure(ctx);
                }
                if let Some(acc) = &sc.acceleration {
                    scheme.set_acceleration(build_acceleration(acc)?);
                }
            }
            scheme.determine_initial_data_exchange();
            Ok(CouplingScheme::Multi(scheme))
        }
        SchemeKind::SerialExplicit | SchemeKind::SerialImplicit => {
            let first = sc.participants[0].clone();
            let second = sc.participants[1].clone();
            let partner = if participant == first { &second } else { &first };
            let mut scheme =
                SerialScheme::new(params, m2n_to(partner)?, first.clone(), second.clone(), sc.method)?;
            for ex in &sc.exchanges {
                let (id, location, components, gradient) = exchange_parts(ex);
                if ex.from == participant {
                    scheme.add_data_to_send(
                        id, location, components, gradient, ex.initialize, &ex.data,
                    )?;
                } else if ex.to == participant {
                    scheme.add_data_to_receive(
                        id, location, components, gradient, ex.initialize, &ex.data,
                    )?;
                }
            }
            if participant == second {
                for ctx in measure_contexts(sc) {
                    scheme.add_convergence_measure(ctx);
                }
                if let Some(acc) = &sc.acceleration {
                    scheme.set_acceleration(build_acceleration(acc)?);
                }
            }
            scheme.determine_initial_data_exchange();
            Ok(CouplingScheme::Serial(scheme))
        }
        SchemeKind::ParallelExplicit | SchemeKind::ParallelImplicit => {
            let first = sc.participants[0].clone();
            let second = sc.participants[1].clone();
            let partner = if participant == first { &second } else { &first };
            let mut scheme =
                ParallelScheme::new(params, m2n_to(partner)?, first.clone(), second.clone())?;
            for ex in &sc.exchanges {
                let (id, location, components, gradient) = exchange_parts(ex);
                if ex.from == participant {
                    scheme.add_data_to_send(
                        id, location, components, gradient, ex.initialize, &ex.data,
                    )?;
                } else if ex.to == participant {
                    scheme.add_data_to_receive(
                        id, location, components, gradient, ex.initialize, &ex.data,
                    )?;
                }
            }
            if participant == second {
                for ctx in measure_contexts(sc) {
                    scheme.add_convergence_measure(ctx);
                }
                if let Some(acc) = &sc.acceleration {
                    scheme.set_acceleration(build_acceleration(acc)?);
                }
            }
            scheme.determine_initial_data_exchange();
            Ok(CouplingScheme::Parallel(scheme))
        }
    }
}
