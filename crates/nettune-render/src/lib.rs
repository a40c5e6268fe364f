//! nettune render - plan to command translation
//!
//! Rendering is a pure function of the [`Plan`]: identical plans render to
//! byte-identical artifacts, kernel parameters are emitted in key order and
//! list-valued categories keep their input order.

pub mod link;
pub mod nft;
pub mod sysctl;
pub mod tc;

use nettune_common::{Plan, RenderedPlan};

/// Render a validated plan into the artifacts the apply engine executes
pub fn render_plan(plan: &Plan) -> RenderedPlan {
    let changes = &plan.changes;
    RenderedPlan {
        iface: plan.iface.clone(),
        sysctl_cmds: sysctl::render_sysctl(changes),
        tc_script: tc::render_tc(&plan.iface, changes),
        nft_script: nft::render_nft(changes),
        ethtool_cmds: link::render_ethtool(&plan.iface, changes),
        ip_link_cmds: link::render_ip_link(&plan.iface, changes),
    }
}
