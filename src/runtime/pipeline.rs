//! Pipeline builder for constructing node graphs

use super::errors::{BuildError, ConnectionError};
use super::node::{InputPort, OutputPort, ProcessNode};
use super::ports::PortSchema;
use super::scheduler::Scheduler;
use super::type_registry::TYPE_REGISTRY;
use super::watchdog::DEFAULT_STALL_THRESHOLD;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::PoisonError;
use std::time::Duration;
use tracing::{debug, info};

/// Default capacity of each connection, in messages (batches)
pub const DEFAULT_BUFFER_SIZE: usize = 64;

/// Pipeline builder that manages nodes and connections
pub struct Pipeline {
    nodes: Vec<(usize, Box<dyn ProcessNode>)>,
    node_names: HashMap<String, usize>,
    node_schemas: HashMap<usize, (Vec<PortSchema>, Vec<PortSchema>)>,
    connections: Vec<PendingConnection>,
    next_id: usize,
    default_buffer_size: usize,
    watchdog_threshold: Duration,
}

struct PendingConnection {
    from_node: usize,
    from_port: usize,
    to_node: usize,
    to_port: usize,
    type_id: TypeId,
    buffer_size: usize,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            node_names: HashMap::new(),
            node_schemas: HashMap::new(),
            connections: Vec::new(),
            next_id: 0,
            default_buffer_size: DEFAULT_BUFFER_SIZE,
            watchdog_threshold: DEFAULT_STALL_THRESHOLD,
        }
    }

    /// Set the default buffer size for connections
    pub fn with_default_buffer_size(mut self, size: usize) -> Self {
        self.default_buffer_size = size;
        self
    }

    /// Set how long a port may block before the watchdog warns
    pub fn with_watchdog_threshold(mut self, threshold: Duration) -> Self {
        self.watchdog_threshold = threshold;
        self
    }

    /// Add a process node by name (ports are taken from the node's schemas)
    pub fn add_process<N: ProcessNode + 'static>(
        &mut self,
        name: impl Into<String>,
        node: N,
    ) -> Result<(), BuildError> {
        let name = name.into();

        if self.node_names.contains_key(&name) {
            return Err(BuildError::DuplicateNode(name));
        }

        let id = self.next_id;
        self.next_id += 1;

        self.node_schemas
            .insert(id, (node.input_schema(), node.output_schema()));
        self.node_names.insert(name, id);
        self.nodes.push((id, Box::new(node)));

        Ok(())
    }

    /// Connect two nodes by name and port name
    pub fn connect(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
    ) -> Result<(), Box<ConnectionError>> {
        self.connect_with_buffer(
            from_node,
            from_port,
            to_node,
            to_port,
            self.default_buffer_size,
        )
    }

    /// Connect with custom buffer size
    pub fn connect_with_buffer(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
        buffer_size: usize,
    ) -> Result<(), Box<ConnectionError>> {
        let from_id = self.node_id(from_node)?;
        let to_id = self.node_id(to_node)?;

        let from_schema = self.node_schemas[&from_id]
            .1
            .iter()
            .find(|s| s.name == from_port)
            .ok_or_else(|| {
                Box::new(ConnectionError::PortNotFound {
                    node: from_node.to_string(),
                    port: from_port.to_string(),
                })
            })?;

        let to_schema = self.node_schemas[&to_id]
            .0
            .iter()
            .find(|s| s.name == to_port)
            .ok_or_else(|| {
                Box::new(ConnectionError::PortNotFound {
                    node: to_node.to_string(),
                    port: to_port.to_string(),
                })
            })?;

        if from_schema.type_id != to_schema.type_id {
            return Err(Box::new(ConnectionError::TypeMismatch {
                from_node: from_node.to_string(),
                from_port: from_port.to_string(),
                from_type: from_schema.type_id,
                to_node: to_node.to_string(),
                to_port: to_port.to_string(),
                to_type: to_schema.type_id,
            }));
        }

        if self
            .connections
            .iter()
            .any(|c| c.to_node == to_id && c.to_port == to_schema.index)
        {
            return Err(Box::new(ConnectionError::DuplicateConnection {
                node: to_node.to_string(),
                port: to_port.to_string(),
            }));
        }

        let connection = PendingConnection {
            from_node: from_id,
            from_port: from_schema.index,
            to_node: to_id,
            to_port: to_schema.index,
            type_id: from_schema.type_id,
            buffer_size,
        };
        self.connections.push(connection);

        Ok(())
    }

    fn node_id(&self, name: &str) -> Result<usize, Box<ConnectionError>> {
        self.node_names
            .get(name)
            .copied()
            .ok_or_else(|| Box::new(ConnectionError::NodeNotFound(name.to_string())))
    }

    /// List all input ports for a node by name
    pub fn list_node_inputs(&self, name: &str) -> Result<&[PortSchema], Box<ConnectionError>> {
        let id = self.node_id(name)?;
        Ok(self.node_schemas[&id].0.as_slice())
    }

    /// List all output ports for a node by name
    pub fn list_node_outputs(&self, name: &str) -> Result<&[PortSchema], Box<ConnectionError>> {
        let id = self.node_id(name)?;
        Ok(self.node_schemas[&id].1.as_slice())
    }

    pub fn list_nodes(&self) -> Vec<&str> {
        self.node_names.keys().map(|s| s.as_str()).collect()
    }

    /// Build the pipeline and start every node on a scheduler
    pub fn build(mut self) -> Result<Scheduler, BuildError> {
        info!(
            "Building pipeline with {} nodes and {} connections",
            self.nodes.len(),
            self.connections.len()
        );

        let registry = TYPE_REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);

        // Phase 1: create every channel before any node starts
        type PortKey = (usize, usize);
        let mut receivers: HashMap<PortKey, Box<dyn Any + Send>> = HashMap::new();
        let mut senders: HashMap<PortKey, (TypeId, Vec<Box<dyn Any + Send>>)> = HashMap::new();

        for conn in &self.connections {
            let (tx, rx) = registry.create_channel(conn.type_id, conn.buffer_size)?;

            receivers.insert((conn.to_node, conn.to_port), rx);
            senders
                .entry((conn.from_node, conn.from_port))
                .or_insert_with(|| (conn.type_id, Vec::new()))
                .1
                .push(tx);
        }

        let mut wired = Vec::with_capacity(self.nodes.len());
        for (node_id, node) in self.nodes.drain(..) {
            let (input_schemas, output_schemas) = self
                .node_schemas
                .remove(&node_id)
                .unwrap_or_default();

            let input_ports: Vec<_> = (0..node.num_inputs())
                .map(|i| {
                    receivers
                        .remove(&(node_id, i))
                        .map(InputPort::from_type_erased)
                        .unwrap_or_else(InputPort::unconnected)
                })
                .collect();

            let output_ports = (0..node.num_outputs())
                .map(|i| match senders.remove(&(node_id, i)) {
                    Some((type_id, sender_list)) => registry
                        .wrap_output(type_id, sender_list)
                        .map(OutputPort::from_type_erased),
                    None => Ok(OutputPort::unconnected()),
                })
                .collect::<Result<Vec<_>, _>>()?;

            wired.push((
                node,
                input_ports,
                output_ports,
                input_schemas,
                output_schemas,
            ));
        }
        drop(registry);

        // Phase 2: attach watchdog context and start threads
        let mut scheduler = Scheduler::with_watchdog_threshold(self.watchdog_threshold);
        let watchdog = scheduler.watchdog().clone();

        for (node, inputs, outputs, input_schemas, output_schemas) in wired {
            let node_name = node.name().to_string();
            debug!("Starting node: {}", node_name);

            let inputs = inputs
                .into_iter()
                .enumerate()
                .map(|(i, port)| {
                    let port_name = port_name(&input_schemas, i, "in");
                    port.with_watchdog(&watchdog, &node_name, &port_name)
                })
                .collect();
            let outputs = outputs
                .into_iter()
                .enumerate()
                .map(|(i, port)| {
                    let port_name = port_name(&output_schemas, i, "out");
                    port.with_watchdog(&watchdog, &node_name, &port_name)
                })
                .collect();

            scheduler.start_process(node, inputs, outputs);
        }

        info!(
            "Pipeline built successfully with {} threads",
            scheduler.num_threads()
        );
        Ok(scheduler)
    }
}

fn port_name(schemas: &[PortSchema], index: usize, fallback: &str) -> String {
    schemas
        .iter()
        .find(|s| s.index == index)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| format!("{}{}", fallback, index))
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SampleBatch;
    use crate::runtime::errors::WorkResult;
    use crate::runtime::ports::PortDirection;

    struct TestSource;
    impl ProcessNode for TestSource {
        fn name(&self) -> &str { "test_source" }
        fn num_inputs(&self) -> usize { 0 }
        fn num_outputs(&self) -> usize { 1 }
        fn output_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::new::<SampleBatch>("out", 0, PortDirection::Output)]
        }
        fn work(&mut self, _inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
            Ok(0)
        }
    }

    struct TestSink;
    impl ProcessNode for TestSink {
        fn name(&self) -> &str { "test_sink" }
        fn num_inputs(&self) -> usize { 1 }
        fn num_outputs(&self) -> usize { 0 }
        fn input_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::new::<SampleBatch>("in", 0, PortDirection::Input)]
        }
        fn work(&mut self, _inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
            Ok(0)
        }
    }

    struct WrongTypeSink;
    impl ProcessNode for WrongTypeSink {
        fn name(&self) -> &str { "wrong_type_sink" }
        fn num_inputs(&self) -> usize { 1 }
        fn num_outputs(&self) -> usize { 0 }
        fn input_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::new::<u64>("in", 0, PortDirection::Input)]
        }
        fn work(&mut self, _inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
            Ok(0)
        }
    }

    #[test]
    fn test_single_connection() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", TestSource).unwrap();
        pipeline.add_process("sink", TestSink).unwrap();
        assert!(pipeline.connect("source", "out", "sink", "in").is_ok());
    }

    #[test]
    fn test_duplicate_input_connection_rejected() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source1", TestSource).unwrap();
        pipeline.add_process("source2", TestSource).unwrap();
        pipeline.add_process("sink", TestSink).unwrap();

        pipeline.connect("source1", "out", "sink", "in").unwrap();
        let err = pipeline.connect("source2", "out", "sink", "in").unwrap_err();
        assert!(err.to_string().contains("already connected"));
    }

    #[test]
    fn test_broadcast_connections_allowed() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", TestSource).unwrap();
        pipeline.add_process("sink1", TestSink).unwrap();
        pipeline.add_process("sink2", TestSink).unwrap();

        assert!(pipeline.connect("source", "out", "sink1", "in").is_ok());
        assert!(pipeline.connect("source", "out", "sink2", "in").is_ok());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", TestSource).unwrap();
        pipeline.add_process("sink", WrongTypeSink).unwrap();
        let err = pipeline.connect("source", "out", "sink", "in").unwrap_err();
        assert!(matches!(*err, ConnectionError::TypeMismatch { .. }));
    }

    #[test]
    fn test_unknown_node_and_port() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("source", TestSource).unwrap();
        pipeline.add_process("sink", TestSink).unwrap();

        let err = pipeline.connect("source", "out", "nonexistent", "in").unwrap_err();
        assert!(matches!(*err, ConnectionError::NodeNotFound(_)));
        let err = pipeline.connect("source", "wrong_port", "sink", "in").unwrap_err();
        assert!(matches!(*err, ConnectionError::PortNotFound { .. }));
    }

    #[test]
    fn test_duplicate_node_name_rejected() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("node1", TestSource).unwrap();
        let err = pipeline.add_process("node1", TestSource).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_list_nodes_and_ports() {
        let mut pipeline = Pipeline::new().with_default_buffer_size(8);
        pipeline.add_process("source", TestSource).unwrap();
        pipeline.add_process("sink", TestSink).unwrap();

        let mut nodes = pipeline.list_nodes();
        nodes.sort();
        assert_eq!(nodes, ["sink", "source"]);
        let outputs = pipeline.list_node_outputs("source").unwrap();
        assert_eq!(outputs[0].name, "out");
        let inputs = pipeline.list_node_inputs("sink").unwrap();
        assert_eq!(inputs[0].name, "in");
        assert!(pipeline.list_node_inputs("missing").is_err());
    }
}
