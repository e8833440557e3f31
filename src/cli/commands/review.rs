//! Proposal review commands.
//!
//! Decisions made here retroactively shape future runs: approvals become
//! records (excluded via their URL), rejections stay excluded as rejected
//! proposals.

use console::style;

use crate::config::Settings;
use crate::models::{LeadRecord, ProposalBody, ProposalStatus};

pub fn cmd_review_list(settings: &Settings, tenant: &str) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    ctx.init_schema()?;
    let proposals = ctx.proposals().list_pending(tenant)?;

    if proposals.is_empty() {
        println!("{} No pending proposals for {}", style("!").yellow(), tenant);
        return Ok(());
    }

    for proposal in proposals {
        println!("{}  {}", proposal.id, style(&proposal.title).bold());
        println!("    {}", proposal.source_url);
        if let ProposalBody::CreateRecord { payload, .. } = &proposal.body {
            if !payload.evaluation_reason.is_empty() {
                println!("    reason: {}", payload.evaluation_reason);
            }
        }
    }
    Ok(())
}

pub fn cmd_review_decide(settings: &Settings, proposal_id: &str, approve: bool) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    ctx.init_schema()?;

    let Some(proposal) = ctx.proposals().get(proposal_id)? else {
        anyhow::bail!("proposal {proposal_id} not found");
    };
    if proposal.status != ProposalStatus::Pending {
        anyhow::bail!(
            "proposal {} already reviewed ({})",
            proposal_id,
            proposal.status.as_str()
        );
    }

    if approve {
        ctx.proposals().set_status(proposal_id, ProposalStatus::Approved)?;
        match &proposal.body {
            ProposalBody::CreateRecord { payload, .. } => {
                let record = LeadRecord::from_draft(&proposal.tenant_id, payload);
                ctx.records().insert(&record)?;
                println!(
                    "{} Approved; created record {} ({})",
                    style("✓").green(),
                    record.id,
                    record.title
                );
            }
            ProposalBody::UpdateRecord { record_id, .. } => {
                println!(
                    "{} Approved update for record {} (apply in CRM)",
                    style("✓").green(),
                    record_id
                );
            }
        }
    } else {
        ctx.proposals().set_status(proposal_id, ProposalStatus::Rejected)?;
        println!("{} Rejected {}", style("✓").green(), proposal.title);
    }
    Ok(())
}
