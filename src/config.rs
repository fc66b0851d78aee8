//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__PLANNER__STRATEGY=tree_of_thought`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub planner: PlannerSection,
}

/// [tools] 段：单次调用超时与默认并发
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（毫秒）
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    /// 并行批次的默认许可数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_tool_timeout_ms() -> u64 {
    30_000
}

fn default_concurrency() -> usize {
    3
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_ms: default_tool_timeout_ms(),
            concurrency: default_concurrency(),
        }
    }
}

/// [executor] 段：步骤重试
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    /// 可重试失败（执行错误、超时）的最多重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: 0,
        }
    }
}

/// [planner] 段：策略选择与各项预算
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerSection {
    /// iterative / plan_execute / reflexion / tree_of_thought
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// 单次运行最多 think→act→observe 轮数
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,
    /// tree_of_thought 每次 think 的候选数
    #[serde(default = "default_branching")]
    pub branching: usize,
    /// reflexion 回灌的最近反思条数
    #[serde(default = "default_max_reflections")]
    pub max_reflections: usize,
}

fn default_strategy() -> String {
    "iterative".to_string()
}

fn default_max_iterations() -> usize {
    20
}

fn default_max_replans() -> u32 {
    3
}

fn default_branching() -> usize {
    3
}

fn default_max_reflections() -> usize {
    3
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_iterations: default_max_iterations(),
            max_replans: default_max_replans(),
            branching: default_branching(),
            max_reflections: default_max_reflections(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.tools.tool_timeout_ms, 30_000);
        assert_eq!(cfg.tools.concurrency, 3);
        assert_eq!(cfg.executor.max_retries, 2);
        assert_eq!(cfg.planner.strategy, "iterative");
        assert_eq!(cfg.planner.max_replans, 3);
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[planner]\nstrategy = \"reflexion\"\nmax_iterations = 7\n\n[tools]\nconcurrency = 5"
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.planner.strategy, "reflexion");
        assert_eq!(cfg.planner.max_iterations, 7);
        assert_eq!(cfg.planner.branching, 3);
        assert_eq!(cfg.tools.concurrency, 5);
        assert_eq!(cfg.tools.tool_timeout_ms, 30_000);
    }
}
