//! First-participant time stepping: the first participant's measured
//! window size is announced to the second participant window by window.

use mesh_couple::interface::SolverInterface;
use mesh_couple::mesh::VertexId;

const CONFIG: &str = r#"
  <solver-interface dimensions="2">
    <data:scalar name="Load" />
    <mesh name="Surface-FPD"><use-data name="Load" /></mesh>
    <participant name="Driver-FPD">
      <provide-mesh name="Surface-FPD" />
      <write-data name="Load" mesh="Surface-FPD" />
    </participant>
    <participant name="Follower-FPD">
      <receive-mesh name="Surface-FPD" from="Driver-FPD" />
      <read-data name="Load" mesh="Surface-FPD" />
    </participant>
    <m2n:local from="Driver-FPD" to="Follower-FPD" />
    <coupling-scheme:serial-explicit>
      <max-time value="0.75" />
      <time-window-size method="first-participant" />
      <participants first="Driver-FPD" second="Follower-FPD" />
      <exchange data="Load" mesh="Surface-FPD" from="Driver-FPD" to="Follower-FPD" />
    </coupling-scheme:serial-explicit>
  </solver-interface>
"#;

#[test]
fn follower_adopts_measured_window_size() {
    let driver = std::thread::spawn(|| {
        let mut couple = SolverInterface::from_config_str("Driver-FPD", CONFIG, 0, 1).unwrap();
        let ids = couple.set_mesh_vertices("Surface-FPD", &[0.0, 0.0]).unwrap();
        let dt = couple.initialize().unwrap();
        // No window size: the limit is the remaining simulation time.
        assert!((dt - 0.75).abs() < 1e-12);
        let mut windows = 0;
        while couple.is_coupling_ongoing() {
            couple
                .write_block_scalar_data("Surface-FPD", "Load", &ids, &[windows as f64])
                .unwrap();
            couple.advance(0.25).unwrap();
            windows += 1;
        }
        couple.finalize().unwrap();
        windows
    });

    let follower = std::thread::spawn(|| {
        let mut couple =
            SolverInterface::from_config_str("Follower-FPD", CONFIG, 0, 1).unwrap();
        let mut dt = couple.initialize().unwrap();
        let v = VertexId::new(0);
        let mut windows = 0;
        while couple.is_coupling_ongoing() {
            // Every window arrives with the driver's measured size.
            assert!((dt - 0.25).abs() < 1e-12, "window {windows} got dt {dt}");
            let load = couple.read_scalar_data("Surface-FPD", "Load", v).unwrap();
            assert_eq!(load, windows as f64);
            dt = couple.advance(dt).unwrap();
            windows += 1;
        }
        couple.finalize().unwrap();
        windows
    });

    assert_eq!(driver.join().unwrap(), 3);
    assert_eq!(follower.join().unwrap(), 3);
}

const CONFIG_TWO_WAY: &str = r#"
  <solver-interface dimensions="2">
    <data:scalar name="Load" />
    <data:scalar name="Echo" />
    <mesh name="Surface-FPD2"><use-data name="Load" /></mesh>
    <mesh name="Back-FPD2"><use-data name="Echo" /></mesh>
    <participant name="Driver-FPD2">
      <provide-mesh name="Surface-FPD2" />
      <receive-mesh name="Back-FPD2" from="Follower-FPD2" />
      <write-data name="Load" mesh="Surface-FPD2" />
      <read-data name="Echo" mesh="Back-FPD2" />
    </participant>
    <participant name="Follower-FPD2">
      <provide-mesh name="Back-FPD2" />
      <receive-mesh name="Surface-FPD2" from="Driver-FPD2" />
      <read-data name="Load" mesh="Surface-FPD2" />
      <write-data name="Echo" mesh="Back-FPD2" />
    </participant>
    <m2n:local from="Driver-FPD2" to="Follower-FPD2" />
    <coupling-scheme:serial-explicit>
      <max-time value="0.75" />
      <time-window-size method="first-participant" />
      <participants first="Driver-FPD2" second="Follower-FPD2" />
      <exchange data="Load" mesh="Surface-FPD2" from="Driver-FPD2" to="Follower-FPD2" />
      <exchange data="Echo" mesh="Back-FPD2" from="Follower-FPD2" to="Driver-FPD2" />
    </coupling-scheme:serial-explicit>
  </solver-interface>
"#;

/// The participant announcing the window size may only read at the very
/// end of the window.
#[test]
fn driver_reads_only_at_window_end() {
    let driver = std::thread::spawn(move || {
        let mut couple =
            SolverInterface::from_config_str("Driver-FPD2", CONFIG_TWO_WAY, 0, 1).unwrap();
        couple
            .set_mesh_vertices("Surface-FPD2", &[0.0, 0.0])
            .unwrap();
        couple.initialize().unwrap();
        let v = VertexId::new(0);
        couple
            .write_scalar_data("Surface-FPD2", "Load", v, 1.0)
            .unwrap();
        couple.advance(0.25).unwrap();
        // Window complete: the remainder is zero, so only tau = 0 passes.
        let err = couple
            .read_scalar_data_at("Back-FPD2", "Echo", v, 0.1)
            .unwrap_err();
        assert!(matches!(
            err,
            mesh_couple::error::CouplingError::ReadTimeOutOfRange { .. }
        ));
        let echo = couple
            .read_scalar_data_at("Back-FPD2", "Echo", v, 0.0)
            .unwrap();
        assert_eq!(echo, 7.0);
        while couple.is_coupling_ongoing() {
            couple
                .write_scalar_data("Surface-FPD2", "Load", v, 1.0)
                .unwrap();
            couple.advance(0.25).unwrap();
        }
        couple.finalize().unwrap();
    });

    let follower = std::thread::spawn(move || {
        let mut couple =
            SolverInterface::from_config_str("Follower-FPD2", CONFIG_TWO_WAY, 0, 1).unwrap();
        couple.set_mesh_vertices("Back-FPD2", &[0.0, 0.0]).unwrap();
        let mut dt = couple.initialize().unwrap();
        let v = VertexId::new(0);
        while couple.is_coupling_ongoing() {
            couple
                .write_scalar_data("Back-FPD2", "Echo", v, 7.0)
                .unwrap();
            dt = couple.advance(dt).unwrap();
        }
        couple.finalize().unwrap();
    });

    driver.join().unwrap();
    follower.join().unwrap();
}
