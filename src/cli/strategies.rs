//! Strategies command - lists every strategy identifier

use crate::domain::StrategyKind;

/// Print one `id<TAB>name` line per strategy
pub fn run() -> anyhow::Result<()> {
    for kind in StrategyKind::ALL {
        println!("{}\t{}", kind.id(), kind.display_name());
    }

    Ok(())
}
