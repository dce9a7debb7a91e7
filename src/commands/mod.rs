//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/`, `parsers/`, `manager/`, `utils/`
//! - 子模块: boxing, split, analyze, sharpen, mask

pub mod analyze;
pub mod boxing;
pub mod mask;
pub mod sharpen;
pub mod split;

use crate::cli::Commands;
use crate::error::Result;
use crate::manager::{MapModelManager, ModelId};
use crate::parsers;
use crate::utils::output;

use std::path::Path;

/// 执行命令
pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Box(args) => boxing::execute(args),
        Commands::Split(args) => split::execute(args),
        Commands::Analyze(args) => analyze::execute(args),
        Commands::Sharpen(args) => sharpen::execute(args),
        Commands::Mask(args) => mask::execute(args),
    }
}

/// 读取主图和可选的主模型
pub(crate) fn load_manager(map_path: &Path, model_path: Option<&Path>) -> Result<MapModelManager> {
    let map = parsers::read_map_file(map_path)?;
    output::print_info(&format!(
        "Map '{}': {:?} points, resolution {:.2} Å",
        map_path.display(),
        map.shape(),
        map.resolution()
    ));
    let mut mmm = MapModelManager::new(map);
    if let Some(path) = model_path {
        let model = parsers::read_model_file(path)?;
        output::print_info(&format!("Model '{}': {} atoms", path.display(), model.len()));
        mmm.add_model(ModelId::primary(), model)?;
    }
    Ok(mmm)
}

/// 写出主模型（原始框架）
pub(crate) fn write_primary_model(mmm: &MapModelManager, path: &Path) -> Result<()> {
    let mut model = mmm.model(&ModelId::primary())?.clone();
    model.shift_back();
    parsers::write_model_file(&model, path)?;
    output::print_written("Model", path);
    Ok(())
}
