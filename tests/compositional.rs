//! A participant coupled in two bilateral schemes runs them as one
//! composed scheme: values propagate down a three-solver chain.

use mesh_couple::interface::SolverInterface;
use mesh_couple::mesh::VertexId;

const CONFIG: &str = r#"
  <solver-interface dimensions="2">
    <data:scalar name="Upstream" />
    <data:scalar name="Downstream" />
    <mesh name="M1-CHAIN"><use-data name="Upstream" /></mesh>
    <mesh name="M2-CHAIN"><use-data name="Downstream" /></mesh>
    <participant name="Source-CHAIN">
      <provide-mesh name="M1-CHAIN" />
      <write-data name="Upstream" mesh="M1-CHAIN" />
    </participant>
    <participant name="Relay-CHAIN">
      <receive-mesh name="M1-CHAIN" from="Source-CHAIN" />
      <provide-mesh name="M2-CHAIN" />
      <read-data name="Upstream" mesh="M1-CHAIN" />
      <write-data name="Downstream" mesh="M2-CHAIN" />
    </participant>
    <participant name="Sink-CHAIN">
      <receive-mesh name="M2-CHAIN" from="Relay-CHAIN" />
      <read-data name="Downstream" mesh="M2-CHAIN" />
    </participant>
    <m2n:local from="Source-CHAIN" to="Relay-CHAIN" />
    <m2n:local from="Relay-CHAIN" to="Sink-CHAIN" />
    <coupling-scheme:serial-explicit>
      <max-time value="2.0" />
      <time-window-size value="1.0" />
      <participants first="Source-CHAIN" second="Relay-CHAIN" />
      <exchange data="Upstream" mesh="M1-CHAIN" from="Source-CHAIN" to="Relay-CHAIN" />
    </coupling-scheme:serial-explicit>
    <coupling-scheme:serial-explicit>
      <max-time value="2.0" />
      <time-window-size value="1.0" />
      <participants first="Relay-CHAIN" second="Sink-CHAIN" />
      <exchange data="Downstream" mesh="M2-CHAIN" from="Relay-CHAIN" to="Sink-CHAIN" />
    </coupling-scheme:serial-explicit>
  </solver-interface>
"#;

/// The relay participant composes its two serial schemes; the sink sees
/// the source's value shifted by one window (the relay forwards what it
/// read in the same window it computed).
#[test]
fn chain_propagates_through_composition() {
    let source = std::thread::spawn(|| {
        let mut couple =
            SolverInterface::from_config_str("Source-CHAIN", CONFIG, 0, 1).unwrap();
        couple.set_mesh_vertices("M1-CHAIN", &[0.0, 0.0]).unwrap();
        let dt = couple.initialize().unwrap();
        let v = VertexId::new(0);
        let mut window = 0.0;
        while couple.is_coupling_ongoing() {
            couple
                .write_scalar_data("M1-CHAIN", "Upstream", v, 10.0 + window)
                .unwrap();
            couple.advance(dt).unwrap();
            window += 1.0;
        }
        couple.finalize().unwrap();
        window as usize
    });

    let relay = std::thread::spawn(|| {
        let mut couple =
            SolverInterface::from_config_str("Relay-CHAIN", CONFIG, 0, 1).unwrap();
        couple.set_mesh_vertices("M2-CHAIN", &[1.0, 0.0]).unwrap();
        let dt = couple.initialize().unwrap();
        let v = VertexId::new(0);
        let mut windows = 0;
        while couple.is_coupling_ongoing() {
            let upstream = couple.read_scalar_data("M1-CHAIN", "Upstream", v).unwrap();
            couple
                .write_scalar_data("M2-CHAIN", "Downstream", v, upstream * 2.0)
                .unwrap();
            couple.advance(dt).unwrap();
            windows += 1;
        }
        couple.finalize().unwrap();
        windows
    });

    let sink = std::thread::spawn(|| {
        let mut couple = SolverInterface::from_config_str("Sink-CHAIN", CONFIG, 0, 1).unwrap();
        let dt = couple.initialize().unwrap();
        let v = VertexId::new(0);
        let mut window = 0.0;
        while couple.is_coupling_ongoing() {
            let downstream = couple
                .read_scalar_data("M2-CHAIN", "Downstream", v)
                .unwrap();
            assert_eq!(downstream, (10.0 + window) * 2.0);
            couple.advance(dt).unwrap();
            window += 1.0;
        }
        couple.finalize().unwrap();
        window as usize
    });

    assert_eq!(source.join().unwrap(), 2);
    assert_eq!(relay.join().unwrap(), 2);
    assert_eq!(sink.join().unwrap(), 2);
}
