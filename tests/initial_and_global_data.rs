//! Initial-data exchange and meshless (global) data, plus fractional-time
//! sampling through a first-order waveform.

use mesh_couple::interface::SolverInterface;
use mesh_couple::mesh::VertexId;

const CONFIG: &str = r#"
  <solver-interface dimensions="2">
    <data:scalar name="Temperature" />
    <global-data:scalar name="Omega" />
    <mesh name="Probe-IGD"><use-data name="Temperature" /></mesh>
    <participant name="Oven-IGD">
      <provide-mesh name="Probe-IGD" />
      <write-data name="Temperature" mesh="Probe-IGD" />
      <write-data name="Omega" />
    </participant>
    <participant name="Cake-IGD">
      <receive-mesh name="Probe-IGD" from="Oven-IGD" />
      <read-data name="Temperature" mesh="Probe-IGD" waveform-order="1" />
      <read-data name="Omega" />
    </participant>
    <m2n:local from="Oven-IGD" to="Cake-IGD" />
    <coupling-scheme:serial-explicit>
      <max-time value="1.0" />
      <time-window-size value="1.0" />
      <participants first="Oven-IGD" second="Cake-IGD" />
      <exchange data="Temperature" mesh="Probe-IGD" from="Oven-IGD" to="Cake-IGD" initialize="true" />
      <exchange data="Omega" from="Oven-IGD" to="Cake-IGD" />
    </coupling-scheme:serial-explicit>
  </solver-interface>
"#;

#[test]
fn initial_data_seeds_the_waveform() {
    let oven = std::thread::spawn(|| {
        let mut couple = SolverInterface::from_config_str("Oven-IGD", CONFIG, 0, 1).unwrap();
        let ids = couple.set_mesh_vertices("Probe-IGD", &[0.0, 0.0]).unwrap();

        // The initialize="true" exchange obliges this side to provide
        // initial values before initialize().
        assert!(couple.requires_initial_data().unwrap());
        couple
            .write_block_scalar_data("Probe-IGD", "Temperature", &ids, &[20.0])
            .unwrap();

        couple.initialize().unwrap();
        couple
            .write_block_scalar_data("Probe-IGD", "Temperature", &ids, &[180.0])
            .unwrap();
        couple.write_global_scalar_data("Omega", 3.5).unwrap();
        couple.advance(1.0).unwrap();
        couple.finalize().unwrap();
    });

    let cake = std::thread::spawn(|| {
        let mut couple = SolverInterface::from_config_str("Cake-IGD", CONFIG, 0, 1).unwrap();
        assert!(!couple.requires_initial_data().unwrap());
        couple.initialize().unwrap();
        let v = VertexId::new(0);

        // Window start holds the initial value, window end the first
        // window's result, and the first-order waveform blends between.
        let start = couple
            .read_scalar_data_at("Probe-IGD", "Temperature", v, 0.0)
            .unwrap();
        assert_eq!(start, 20.0);
        let end = couple
            .read_scalar_data_at("Probe-IGD", "Temperature", v, 1.0)
            .unwrap();
        assert_eq!(end, 180.0);
        let mid = couple
            .read_scalar_data_at("Probe-IGD", "Temperature", v, 0.5)
            .unwrap();
        assert_eq!(mid, 100.0);

        assert_eq!(couple.read_global_scalar_data("Omega").unwrap(), 3.5);

        couple.advance(1.0).unwrap();
        couple.finalize().unwrap();
    });

    oven.join().unwrap();
    cake.join().unwrap();
}
