pub use crate::common::*;
pub use crate::config::{Metric, Mode, SimConfig, SimOptions, SolverKind};
pub use crate::error::{ConfigError, EngineError, InputError, SimulationError};
pub use crate::props::*;
pub use crate::serializer::SimDataSerializer;
pub use crate::simulation::{run_simulation, run_simulation_with, WriterKind};
pub use crate::writer::{BatchWriter, ReliabilityWriter, SimOutput, SimpleWriter, Summary, Writer};
