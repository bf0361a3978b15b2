use caremesh_orchestrator::{AgentCategory, AgentRegistration};

/// The reference agent fleet of the clinical deployment.
///
/// Ten agents covering the emergency, clinical, quantum, research, and
/// operational categories, with capability sets and routing weights
/// matching the production roster.
pub fn reference_fleet() -> Vec<AgentRegistration> {
    vec![
        AgentRegistration::new("quantum-optimizer", "Quantum Resource Optimizer", AgentCategory::Quantum)
            .with_capabilities([
                "or_scheduling",
                "staff_rostering",
                "bed_allocation",
                "quantum_optimization",
            ])
            .with_priority_weight(8),
        AgentRegistration::new("sepsis-prediction", "Sepsis Prediction & Intervention", AgentCategory::Emergency)
            .with_capabilities([
                "vital_monitoring",
                "sepsis_detection",
                "early_warning",
                "protocol_activation",
            ])
            .with_priority_weight(10),
        AgentRegistration::new("surgical-safety", "Surgical Safety Checklist", AgentCategory::Clinical)
            .with_capabilities([
                "checklist_verification",
                "instrument_counting",
                "patient_verification",
                "computer_vision",
            ])
            .with_priority_weight(9),
        AgentRegistration::new("radiology-reporting", "Radiology Auto-Reporting", AgentCategory::Clinical)
            .with_capabilities([
                "image_analysis",
                "report_generation",
                "critical_findings",
                "dicom_processing",
            ])
            .with_priority_weight(7),
        AgentRegistration::new("medication-reconciliation", "Medication Reconciliation", AgentCategory::Clinical)
            .with_capabilities([
                "drug_interaction",
                "dose_checking",
                "medication_history",
                "patient_education",
            ])
            .with_priority_weight(8),
        AgentRegistration::new("clinical-trial-matching", "Clinical Trial Matching", AgentCategory::Research)
            .with_capabilities([
                "eligibility_screening",
                "trial_matching",
                "patient_outreach",
                "enrollment_tracking",
            ])
            .with_priority_weight(5),
        AgentRegistration::new("readmission-prevention", "Predictive Readmission Prevention", AgentCategory::Operational)
            .with_capabilities([
                "risk_scoring",
                "followup_scheduling",
                "patient_monitoring",
                "care_coordination",
            ])
            .with_priority_weight(7),
        AgentRegistration::new("outbreak-detector", "Infectious Disease Outbreak Detector", AgentCategory::Emergency)
            .with_capabilities([
                "infection_surveillance",
                "outbreak_detection",
                "contact_tracing",
                "isolation_protocols",
            ])
            .with_priority_weight(9),
        AgentRegistration::new("mental-health-crisis", "Mental Health Crisis Predictor", AgentCategory::Clinical)
            .with_capabilities([
                "risk_assessment",
                "crisis_detection",
                "suicide_prevention",
                "psychiatric_referral",
            ])
            .with_priority_weight(10),
        AgentRegistration::new("genomic-therapy", "Genomic Therapy Recommender", AgentCategory::Research)
            .with_capabilities([
                "genomic_analysis",
                "therapy_matching",
                "precision_medicine",
                "outcome_prediction",
            ])
            .with_priority_weight(6),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_fleet_has_ten_unique_agents() {
        let fleet = reference_fleet();
        assert_eq!(fleet.len(), 10);
        let ids: HashSet<&str> = fleet.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn test_every_agent_declares_capabilities() {
        for agent in reference_fleet() {
            assert!(!agent.capabilities.is_empty(), "{} has no capabilities", agent.id);
            assert!((1..=10).contains(&agent.priority_weight));
        }
    }
}
