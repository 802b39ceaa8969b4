//! Lifecycle and argument misuse must fail with diagnostic errors, not
//! corrupt the coupling.

use mesh_couple::error::{CouplingError, ErrorKind};
use mesh_couple::interface::SolverInterface;
use mesh_couple::mesh::VertexId;

const CONFIG: &str = r#"
  <solver-interface dimensions="2">
    <data:vector name="Motion" />
    <mesh name="M-MISUSE"><use-data name="Motion" /></mesh>
    <participant name="Alone-MISUSE">
      <provide-mesh name="M-MISUSE" />
      <write-data name="Motion" mesh="M-MISUSE" />
    </participant>
    <participant name="Peer-MISUSE">
      <receive-mesh name="M-MISUSE" from="Alone-MISUSE" />
      <read-data name="Motion" mesh="M-MISUSE" />
    </participant>
    <m2n:local from="Alone-MISUSE" to="Peer-MISUSE" />
    <coupling-scheme:serial-explicit>
      <max-time value="1.0" />
      <time-window-size value="1.0" />
      <participants first="Alone-MISUSE" second="Peer-MISUSE" />
      <exchange data="Motion" mesh="M-MISUSE" from="Alone-MISUSE" to="Peer-MISUSE" />
    </coupling-scheme:serial-explicit>
  </solver-interface>
"#;

#[test]
fn unknown_participant_is_rejected() {
    let err = SolverInterface::from_config_str("Nobody", CONFIG, 0, 1).unwrap_err();
    assert!(matches!(err, CouplingError::UnknownParticipant(_)));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn vertex_ids_are_dense_and_counted() {
    let mut couple = SolverInterface::from_config_str("Alone-MISUSE", CONFIG, 0, 1).unwrap();
    let first = couple
        .set_mesh_vertices("M-MISUSE", &[0.0, 0.0, 1.0, 0.0])
        .unwrap();
    assert_eq!(first.iter().map(|v| v.get()).collect::<Vec<_>>(), [0, 1]);
    let second = couple.set_mesh_vertices("M-MISUSE", &[2.0, 0.0]).unwrap();
    assert_eq!(second[0].get(), 2);
    assert_eq!(couple.get_mesh_vertex_size("M-MISUSE").unwrap(), 3);
}

#[test]
fn calls_in_wrong_state_fail() {
    let mut couple = SolverInterface::from_config_str("Alone-MISUSE", CONFIG, 0, 1).unwrap();
    couple.set_mesh_vertex("M-MISUSE", &[0.0, 0.0]).unwrap();

    // Reads need an initialized interface.
    let err = couple
        .read_block_scalar_data("M-MISUSE", "Motion", &[VertexId::new(0)])
        .unwrap_err();
    assert!(matches!(err, CouplingError::WrongState { .. }));
    assert_eq!(err.kind(), ErrorKind::User);

    // Advancing before initialize is equally wrong.
    assert!(matches!(
        couple.advance(0.1).unwrap_err(),
        CouplingError::WrongState { .. }
    ));

    // Scalar access to vector data is a dimension mismatch.
    let err = couple
        .write_scalar_data("M-MISUSE", "Motion", VertexId::new(0), 1.0)
        .unwrap_err();
    assert!(matches!(err, CouplingError::DimensionMismatch { .. }));

    // Out-of-range vertex ids name the mesh and its size.
    let err = couple
        .write_vector_data("M-MISUSE", "Motion", VertexId::new(7), &[1.0, 2.0])
        .unwrap_err();
    assert!(matches!(
        err,
        CouplingError::InvalidVertexId { id: 7, size: 1, .. }
    ));

    // Finalize works from Constructed, but only once.
    couple.finalize().unwrap();
    assert!(matches!(
        couple.finalize().unwrap_err(),
        CouplingError::FinalizedTwice
    ));
}

#[test]
fn meshes_lock_after_initialize() {
    let config = CONFIG.replace("-MISUSE", "-LOCK");
    let cfg = config.clone();
    let alone = std::thread::spawn(move || {
        let mut couple = SolverInterface::from_config_str("Alone-LOCK", &cfg, 0, 1).unwrap();
        let ids = couple.set_mesh_vertices("M-LOCK", &[0.0, 0.0]).unwrap();
        couple.initialize().unwrap();
        let err = couple.set_mesh_vertex("M-LOCK", &[1.0, 1.0]).unwrap_err();
        assert!(matches!(err, CouplingError::MeshLocked(_)));

        // reset_mesh unlocks and clears; ids restart at zero.
        couple.reset_mesh("M-LOCK").unwrap();
        let id = couple.set_mesh_vertex("M-LOCK", &[1.0, 1.0]).unwrap();
        assert_eq!(id.get(), 0);

        // The window still has to be driven to completion for the peer.
        couple.reset_mesh("M-LOCK").unwrap();
        couple.set_mesh_vertex("M-LOCK", &[0.0, 0.0]).unwrap();
        couple
            .write_vector_data("M-LOCK", "Motion", ids[0], &[1.0, 2.0])
            .unwrap();
        couple.advance(1.0).unwrap();
        couple.finalize().unwrap();
    });
    let peer = std::thread::spawn(move || {
        let mut couple = SolverInterface::from_config_str("Peer-LOCK", &config, 0, 1).unwrap();
        couple.initialize().unwrap();
        couple.advance(1.0).unwrap();
        couple.finalize().unwrap();
    });
    alone.join().unwrap();
    peer.join().unwrap();
}

#[test]
fn nonpositive_dt_poisons_the_interface() {
    let config = CONFIG.replace("-MISUSE", "-DT");
    let cfg = config.clone();
    let alone = std::thread::spawn(move || {
        let mut couple = SolverInterface::from_config_str("Alone-DT", &cfg, 0, 1).unwrap();
        couple.set_mesh_vertex("M-DT", &[0.0, 0.0]).unwrap();
        couple.initialize().unwrap();
        assert!(matches!(
            couple.advance(0.0).unwrap_err(),
            CouplingError::NonPositiveTimeStep(_)
        ));
        // The interface is now in its terminal failure state.
        assert!(matches!(
            couple.advance(0.5).unwrap_err(),
            CouplingError::Poisoned
        ));
        // Best-effort finalize is still allowed.
        let _ = couple.finalize();
    });
    let peer = std::thread::spawn(move || {
        let mut couple = SolverInterface::from_config_str("Peer-DT", &config, 0, 1).unwrap();
        // The first participant fails before sending its window result;
        // its abortive shutdown surfaces here as a transport error.
        let err = couple.initialize().unwrap_err();
        assert!(matches!(err, CouplingError::Transport(_)));
    });
    alone.join().unwrap();
    peer.join().unwrap();
}
