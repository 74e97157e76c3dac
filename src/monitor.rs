//! Top-level routine for the monitor command
//!

use log::info;
use simple_error::SimpleResult;

use crate::cli::{MonitorSettings, SharedSettings, write_monitor_settings};
use crate::controller::run_monitor_with_stages;
use crate::external_tools::ExternalTools;
use crate::merge::PanelEvaluation;
use crate::panel_match::MatchParams;
use crate::reference_panel::ReferencePanel;
use crate::state::WorkDirLayout;

fn get_external_tools(shared: &SharedSettings, settings: &MonitorSettings) -> ExternalTools {
    let layout = WorkDirLayout::new(&settings.work_dir);
    ExternalTools {
        minimap2: settings.minimap2.clone(),
        samtools: settings.samtools.clone(),
        pandepth: settings.pandepth.clone(),
        cutesv: settings.cutesv.clone(),
        platform: settings.platform.clone(),
        thread_count: shared.thread_count,
        reference: settings.reference.clone(),
        reference_index: settings
            .mmi_path
            .clone()
            .unwrap_or_else(|| layout.reference_index()),
        cutesv_work_dir: layout.cutesv_work_dir(),
    }
}

/// Read the SV panel, if one is configured
///
fn get_panel_evaluation(settings: &MonitorSettings) -> SimpleResult<Option<PanelEvaluation>> {
    let Some((filename, mode)) = settings.panel_source() else {
        info!("No SV panel specified, snapshots will not be evaluated");
        return Ok(None);
    };
    Ok(Some(PanelEvaluation {
        panel: ReferencePanel::from_file(filename, mode)?,
        params: MatchParams::from_pctsize(settings.pctsize, settings.ref_dist),
        recall_file: settings.get_recall_file(),
        target_rate: settings.target_rate,
    }))
}

pub fn run_monitor(shared: &SharedSettings, settings: &MonitorSettings) -> SimpleResult<()> {
    write_monitor_settings(&settings.work_dir, settings);

    let tools = get_external_tools(shared, settings);
    tools.warn_on_missing_commands();

    let evaluation = get_panel_evaluation(settings)?;
    run_monitor_with_stages(&settings.monitor_config(), &tools, evaluation.as_ref())?;
    Ok(())
}
