//! Business logic services

pub mod auditor;
pub mod calendar;
pub mod conversion;
pub mod maintenance;
pub mod notifications;
pub mod reassignment;
pub mod recalculator;

use std::sync::Arc;

use crate::{config::AppConfig, repository::Repository};

/// Container for all services
pub struct Services {
    pub recalculator: recalculator::Recalculator,
    pub reassignment: reassignment::ReassignmentEngine,
    pub auditor: auditor::Auditor,
    pub maintenance: maintenance::MaintenanceOrchestrator,
}

impl Services {
    /// Create all services with the given repository, wired to the
    /// production collaborators.
    pub fn new(repository: Repository, config: &AppConfig) -> Self {
        let recalculator = recalculator::Recalculator::new(repository.clone());

        let notifier: Arc<dyn notifications::Notifier> =
            Arc::new(notifications::EmailNotifier::new(config.email.clone()));
        let admin_notifier: Arc<dyn notifications::AdminNotifier> =
            Arc::new(notifications::UpdateLogAdminNotifier::new(repository.clone()));
        let converter: Arc<dyn conversion::ReservationConverter> = Arc::new(
            conversion::QueueReservationConverter::new(repository.clone(), recalculator.clone()),
        );
        let calendar: Arc<dyn calendar::CalendarExport> =
            Arc::new(calendar::LoanCalendarExport::new(repository.clone()));

        Self {
            reassignment: reassignment::ReassignmentEngine::new(
                repository.clone(),
                notifier.clone(),
                admin_notifier,
            ),
            auditor: auditor::Auditor::new(
                repository.clone(),
                recalculator.clone(),
                config.maintenance.canonical_base_url.clone(),
            ),
            maintenance: maintenance::MaintenanceOrchestrator::new(
                repository,
                recalculator.clone(),
                converter,
                calendar,
                notifier,
                Arc::new(maintenance::SystemClock),
                config.maintenance.clone(),
            ),
            recalculator,
        }
    }
}
