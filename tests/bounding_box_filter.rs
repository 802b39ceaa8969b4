//! Geometric filtering of a received mesh against a direct-access region.

use mesh_couple::interface::SolverInterface;

const CONFIG: &str = r#"
  <solver-interface dimensions="2" experimental="true">
    <data:scalar name="Field" />
    <mesh name="Grid-BBF"><use-data name="Field" /></mesh>
    <participant name="Provider-BBF">
      <provide-mesh name="Grid-BBF" />
      <write-data name="Field" mesh="Grid-BBF" />
    </participant>
    <participant name="Observer-BBF">
      <receive-mesh name="Grid-BBF" from="Provider-BBF" direct-access="true" safety-factor="0.0" />
      <read-data name="Field" mesh="Grid-BBF" />
    </participant>
    <m2n:local from="Provider-BBF" to="Observer-BBF" />
    <coupling-scheme:serial-explicit>
      <max-time value="1.0" />
      <time-window-size value="1.0" />
      <participants first="Provider-BBF" second="Observer-BBF" />
      <exchange data="Field" mesh="Grid-BBF" from="Provider-BBF" to="Observer-BBF" />
    </coupling-scheme:serial-explicit>
  </solver-interface>
"#;

/// Provider vertices span the unit square; the observer's access region
/// is `[0.5, 1.5]^2`, so only vertices with both coordinates >= 0.5
/// survive the filter, in provider order and with their values intact.
#[test]
fn observer_sees_only_region() {
    let provider = std::thread::spawn(|| {
        let mut couple =
            SolverInterface::from_config_str("Provider-BBF", CONFIG, 0, 1).unwrap();
        let ids = couple
            .set_mesh_vertices(
                "Grid-BBF",
                &[
                    0.0, 0.0, //
                    1.0, 0.0, //
                    0.0, 1.0, //
                    1.0, 1.0, //
                    0.5, 0.5, //
                    0.75, 0.6, //
                    0.4, 0.9, //
                ],
            )
            .unwrap();
        couple.initialize().unwrap();
        couple
            .write_block_scalar_data(
                "Grid-BBF",
                "Field",
                &ids,
                &[10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0],
            )
            .unwrap();
        couple.advance(1.0).unwrap();
        couple.finalize().unwrap();
    });

    let observer = std::thread::spawn(|| {
        let mut couple =
            SolverInterface::from_config_str("Observer-BBF", CONFIG, 0, 1).unwrap();
        couple
            .set_mesh_access_region("Grid-BBF", &[0.5, 1.5, 0.5, 1.5])
            .unwrap();
        couple.initialize().unwrap();

        assert_eq!(couple.get_mesh_vertex_size("Grid-BBF").unwrap(), 3);
        let (ids, coords) = couple.get_mesh_vertices_and_ids("Grid-BBF").unwrap();
        assert_eq!(coords, vec![1.0, 1.0, 0.5, 0.5, 0.75, 0.6]);

        let values = couple
            .read_block_scalar_data("Grid-BBF", "Field", &ids)
            .unwrap();
        assert_eq!(values, vec![40.0, 50.0, 60.0]);

        couple.advance(1.0).unwrap();
        couple.finalize().unwrap();
    });

    provider.join().unwrap();
    observer.join().unwrap();
}

/// An empty region is a valid empty partition, not an error.
#[test]
fn empty_region_is_allowed() {
    let config = CONFIG.replace("-BBF", "-BBE");
    let cfg = config.clone();
    let provider = std::thread::spawn(move || {
        let mut couple = SolverInterface::from_config_str("Provider-BBE", &cfg, 0, 1).unwrap();
        let ids = couple
            .set_mesh_vertices("Grid-BBE", &[0.0, 0.0, 1.0, 1.0])
            .unwrap();
        couple.initialize().unwrap();
        couple
            .write_block_scalar_data("Grid-BBE", "Field", &ids, &[1.0, 2.0])
            .unwrap();
        couple.advance(1.0).unwrap();
        couple.finalize().unwrap();
    });
    let observer = std::thread::spawn(move || {
        let mut couple = SolverInterface::from_config_str("Observer-BBE", &config, 0, 1).unwrap();
        couple
            .set_mesh_access_region("Grid-BBE", &[5.0, 6.0, 5.0, 6.0])
            .unwrap();
        couple.initialize().unwrap();
        assert_eq!(couple.get_mesh_vertex_size("Grid-BBE").unwrap(), 0);
        couple.advance(1.0).unwrap();
        couple.finalize().unwrap();
    });
    provider.join().unwrap();
    observer.join().unwrap();
}
