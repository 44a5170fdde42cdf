//! Engine configuration, populated from UCI `setoption` commands.
//!
//! Grounded on `original_source/src/engine/engine_interface.h`'s
//! `getOptions()`/`setEngineOption()` contract and on spec.md §6's
//! configuration table. Kept as a plain struct with defaults rather than
//! a registry, matching the teacher's preference for concrete types over
//! reflection-style option tables.

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Number of MCTS worker threads.
    pub threads: usize,
    /// PUCT exploration constant.
    pub c_puct: f32,
    /// Dirichlet noise alpha applied to root priors.
    pub dirichlet_alpha: f32,
    /// Fraction of root prior mass replaced by Dirichlet noise.
    pub dirichlet_epsilon: f32,
    /// Softmax temperature applied to the root visit distribution when
    /// selecting a move (not to the policy head itself).
    pub temperature: f32,
    /// Maximum number of positions batched together for one inference
    /// call.
    pub max_nn_batch_size: usize,
    /// Size in bytes of each arena block.
    pub block_size: usize,
    /// Upper bound, in bytes, on total arena memory before compaction is
    /// forced regardless of `deallocation_minimum`.
    pub memory_budget_bytes: usize,
    /// Number of freed nodes that must accumulate before `free_memory`
    /// considers compacting (see spec.md §9 Open Question 4).
    pub deallocation_minimum: usize,
    /// Divisor applied to total allocated nodes to derive the
    /// compaction threshold alongside `deallocation_minimum`.
    pub deallocation_factor: usize,
    /// Per-move overhead subtracted from the time budget to account for
    /// UCI/GUI round-trip latency, in milliseconds.
    pub move_overhead_ms: u64,
    /// Hard node-count cap for a search, 0 meaning unlimited.
    pub nodes_limit: u64,
    /// Optional path to redirect informational logging to a file instead
    /// of stderr.
    pub general_log_file: Option<String>,
    /// Optional path for the search-tree graph dump emitted when a root
    /// move is played (debugging aid, off by default).
    pub graph_log_file: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            threads: 1,
            c_puct: 2.0,
            dirichlet_alpha: 0.3,
            dirichlet_epsilon: 0.25,
            temperature: 1.0,
            max_nn_batch_size: 2048,
            block_size: 8 * 1024 * 1024,
            memory_budget_bytes: 1024 * 1024 * 1024,
            deallocation_minimum: 65536,
            deallocation_factor: 32,
            move_overhead_ms: 30,
            nodes_limit: 0,
            general_log_file: None,
            graph_log_file: None,
        }
    }
}

impl EngineOptions {
    /// Applies a single UCI `setoption name <name> value <value>` pair.
    /// Unknown option names are accepted silently per the UCI protocol
    /// (a GUI may probe options the engine doesn't declare).
    pub fn set(&mut self, name: &str, value: &str) {
        match name.to_ascii_lowercase().as_str() {
            "threads" => {
                if let Ok(v) = value.parse() {
                    self.threads = v;
                }
            }
            "cpuct" => {
                if let Ok(v) = value.parse() {
                    self.c_puct = v;
                }
            }
            "dirichletalpha" => {
                if let Ok(v) = value.parse() {
                    self.dirichlet_alpha = v;
                }
            }
            "dirichletepsilon" => {
                if let Ok(v) = value.parse() {
                    self.dirichlet_epsilon = v;
                }
            }
            "temperature" => {
                if let Ok(v) = value.parse() {
                    self.temperature = v;
                }
            }
            "maxnnbatchsize" => {
                if let Ok(v) = value.parse() {
                    self.max_nn_batch_size = v;
                }
            }
            "blocksize" => {
                if let Ok(v) = value.parse() {
                    self.block_size = v;
                }
            }
            "memorybudgetbytes" => {
                if let Ok(v) = value.parse() {
                    self.memory_budget_bytes = v;
                }
            }
            "deallocationminimum" => {
                if let Ok(v) = value.parse() {
                    self.deallocation_minimum = v;
                }
            }
            "deallocationfactor" => {
                if let Ok(v) = value.parse() {
                    self.deallocation_factor = v;
                }
            }
            "moveoverheadms" => {
                if let Ok(v) = value.parse() {
                    self.move_overhead_ms = v;
                }
            }
            "nodeslimit" => {
                if let Ok(v) = value.parse() {
                    self.nodes_limit = v;
                }
            }
            "generallogfile" => {
                self.general_log_file = if value.is_empty() { None } else { Some(value.to_string()) };
            }
            "graphlogfile" => {
                self.graph_log_file = if value.is_empty() { None } else { Some(value.to_string()) };
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let opts = EngineOptions::default();
        assert_eq!(opts.deallocation_factor, 32);
        assert_eq!(opts.deallocation_minimum, 65536);
    }

    #[test]
    fn test_set_known_and_unknown() {
        let mut opts = EngineOptions::default();
        opts.set("Threads", "4");
        assert_eq!(opts.threads, 4);
        opts.set("SomeUnknownOption", "whatever");
        assert_eq!(opts.threads, 4);
    }
}
