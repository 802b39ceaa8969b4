//! Serial explicit coupling of two single-rank participants over the
//! in-process transport.

use mesh_couple::interface::SolverInterface;

const CONFIG: &str = r#"
  <solver-interface dimensions="2">
    <data:scalar name="Pressure" />
    <mesh name="Interface"><use-data name="Pressure" /></mesh>
    <participant name="Gas-SE">
      <provide-mesh name="Interface" />
      <write-data name="Pressure" mesh="Interface" />
    </participant>
    <participant name="Pipe-SE">
      <receive-mesh name="Interface" from="Gas-SE" />
      <read-data name="Pressure" mesh="Interface" />
    </participant>
    <m2n:local from="Gas-SE" to="Pipe-SE" />
    <coupling-scheme:serial-explicit>
      <max-time value="3.0" />
      <time-window-size value="1.0" />
      <participants first="Gas-SE" second="Pipe-SE" />
      <exchange data="Pressure" mesh="Interface" from="Gas-SE" to="Pipe-SE" />
    </coupling-scheme:serial-explicit>
  </solver-interface>
"#;

/// Exactly three unit windows fit into max-time 3.0; both sides stop
/// after three advances, and every written buffer arrives unchanged at
/// the window end.
#[test]
fn three_windows_then_done() {
    let gas = std::thread::spawn(|| {
        let mut couple = SolverInterface::from_config_str("Gas-SE", CONFIG, 0, 1).unwrap();
        let ids = couple
            .set_mesh_vertices("Interface", &[0.0, 0.0, 1.0, 0.0, 2.0, 0.0])
            .unwrap();
        let dt = couple.initialize().unwrap();
        assert_eq!(dt, 1.0);
        let mut advances = 0;
        while couple.is_coupling_ongoing() {
            let window = advances as f64;
            couple
                .write_block_scalar_data(
                    "Interface",
                    "Pressure",
                    &ids,
                    &[window + 1.0, window + 2.0, window + 3.0],
                )
                .unwrap();
            couple.advance(1.0).unwrap();
            advances += 1;
            assert!(couple.is_time_window_complete());
        }
        couple.finalize().unwrap();
        advances
    });

    let pipe = std::thread::spawn(|| {
        let mut couple = SolverInterface::from_config_str("Pipe-SE", CONFIG, 0, 1).unwrap();
        let dt = couple.initialize().unwrap();
        assert_eq!(dt, 1.0);
        assert_eq!(couple.get_mesh_vertex_size("Interface").unwrap(), 3);
        let ids: Vec<_> = (0..3u32).map(mesh_couple::mesh::VertexId::new).collect();
        let mut advances = 0;
        while couple.is_coupling_ongoing() {
            // End-of-window sample equals what the first participant wrote
            // for this window.
            let window = advances as f64;
            let values = couple
                .read_block_scalar_data("Interface", "Pressure", &ids)
                .unwrap();
            assert_eq!(values, vec![window + 1.0, window + 2.0, window + 3.0]);
            couple.advance(1.0).unwrap();
            advances += 1;
        }
        couple.finalize().unwrap();
        advances
    });

    assert_eq!(gas.join().unwrap(), 3);
    assert_eq!(pipe.join().unwrap(), 3);
}
