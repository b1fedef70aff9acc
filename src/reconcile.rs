//! The reconciliation state machine.
//!
//! A pass over one kind runs in two phases. [`Reconciler::plan`] resolves
//! regions, validates the desired records, lists the remote inventory and
//! decides what to do with every binding without touching anything.
//! [`Reconciler::apply`] then executes those decisions one remote call at a
//! time. [`Reconciler::reconcile`] is both phases back to back.
//!
//! | ensure    | observed | action                                   |
//! |-----------|----------|------------------------------------------|
//! | `present` | none     | create, then tag (bounded retry)         |
//! | `present` | differs  | update, if every change is mutable       |
//! | `present` | in sync  | noop                                     |
//! | `absent`  | some     | detach dependents in order, then delete  |
//! | `absent`  | none     | noop                                     |
//!
//! A failure of one resource is recorded in its [`Outcome`] and the pass
//! moves on. Only a failed listing aborts the pass, before any mutation.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::api::{ControlPlane, CreateRequest};
use crate::config::ProviderConfig;
use crate::error::{ApiError, Operation, ReconcileError};
use crate::fetch::{to_record, Fetcher};
use crate::guard;
use crate::kind::{NameSource, ResourceKind};
use crate::matcher::match_resources;
use crate::retry::{retry_bounded, Exhausted};
use crate::types::{
    Action, AttributeChange, Binding, Dependent, DesiredResource, Ensure, ObservedRecord, Outcome,
    Plan, PlannedAction, PlannedChange,
};
use crate::validation;

/// Drives desired resources to their declared state through a
/// [`ControlPlane`].
pub struct Reconciler<C> {
    api: C,
    config: ProviderConfig,
}

impl<C: ControlPlane> Reconciler<C> {
    /// Create a reconciler. Fails if the configuration has errors; warnings
    /// are logged.
    pub fn new(api: C, config: ProviderConfig) -> Result<Self, ReconcileError> {
        config.validate_result()?;
        for diagnostic in config.validate() {
            warn!(
                summary = %diagnostic.summary,
                attribute = ?diagnostic.attribute,
                "Configuration warning"
            );
        }
        Ok(Self { api, config })
    }

    /// The control plane this reconciler talks to.
    pub fn api(&self) -> &C {
        &self.api
    }

    /// The active configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// List every existing object of `kind` in the target regions.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn instances(&self, kind: ResourceKind) -> Result<Vec<ObservedRecord>, ReconcileError> {
        let fetcher = Fetcher::new(&self.api);
        let regions = fetcher.target_regions(kind, &self.config).await?;
        fetcher.list(kind, &regions).await
    }

    /// Reconcile `desired` resources of the kind named `type_name`.
    pub async fn reconcile_type(
        &self,
        type_name: &str,
        desired: Vec<DesiredResource>,
    ) -> Result<Vec<Outcome>, ReconcileError> {
        let kind: ResourceKind = type_name.parse()?;
        self.reconcile(kind, desired).await
    }

    /// Run one reconciliation pass: plan, then apply.
    ///
    /// Returns one [`Outcome`] per desired resource. The error case is
    /// reserved for a failed inventory listing, in which case nothing was
    /// changed.
    #[instrument(skip(self, desired), fields(kind = %kind, desired = desired.len()))]
    pub async fn reconcile(
        &self,
        kind: ResourceKind,
        desired: Vec<DesiredResource>,
    ) -> Result<Vec<Outcome>, ReconcileError> {
        let plan = self.plan(kind, desired).await?;
        info!(plan = %plan.summary(), "Reconciling");

        let outcomes = self.apply(plan).await;
        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(outcomes = outcomes.len(), failed, "Reconciliation pass finished");
        Ok(outcomes)
    }

    /// Decide what to do with each desired resource without changing
    /// anything remotely.
    ///
    /// Entries come in desired order, followed by duplicate declarations and
    /// then records rejected by validation.
    pub async fn plan(
        &self,
        kind: ResourceKind,
        desired: Vec<DesiredResource>,
    ) -> Result<Plan, ReconcileError> {
        let mut valid = Vec::with_capacity(desired.len());
        let mut rejected = Vec::new();

        for resource in desired {
            let resource = self.resolve_region(kind, resource);
            match self.check_desired(kind, &resource) {
                Ok(()) => valid.push(resource),
                Err(error) => {
                    warn!(
                        kind = %kind,
                        name = %resource.name,
                        error = %error,
                        "Rejecting desired resource"
                    );
                    rejected.push(PlannedChange::rejected(unbound(resource), error));
                },
            }
        }

        let observed = if valid.is_empty() {
            Vec::new()
        } else {
            let regions = self.listing_regions(kind, &valid);
            Fetcher::new(&self.api).list(kind, &regions).await?
        };

        let matched = match_resources(kind, valid, observed);
        let mut changes: Vec<PlannedChange> = matched
            .bindings
            .into_iter()
            .map(|binding| decide(kind, binding))
            .collect();

        for duplicate in matched.duplicates {
            let error = ReconcileError::invalid(
                kind,
                duplicate.name.as_str(),
                format!(
                    "'{}' is declared more than once in {}",
                    duplicate.name,
                    duplicate.region.as_deref().unwrap_or(&self.config.global_region)
                ),
            );
            changes.push(PlannedChange::rejected(unbound(duplicate), error));
        }
        changes.extend(rejected);

        let plan = Plan {
            kind,
            changes,
            unmanaged: matched.unbound,
        };
        debug!(
            kind = %kind,
            plan = %plan.summary(),
            unmanaged = plan.unmanaged.len(),
            "Planned pass"
        );
        Ok(plan)
    }

    /// Execute a plan, one resource at a time.
    #[instrument(skip_all, fields(kind = %plan.kind))]
    pub async fn apply(&self, plan: Plan) -> Vec<Outcome> {
        let kind = plan.kind;
        let mut outcomes = Vec::with_capacity(plan.changes.len());

        for change in plan.changes {
            let outcome = self.execute(kind, change).await;
            match &outcome.error {
                Some(error) => warn!(
                    name = %outcome.name,
                    region = %outcome.region,
                    action = %outcome.action,
                    error = %error,
                    "Resource did not reach its desired state"
                ),
                None => debug!(
                    name = %outcome.name,
                    region = %outcome.region,
                    action = %outcome.action,
                    "Resource reconciled"
                ),
            }
            outcomes.push(outcome);
        }

        outcomes
    }

    fn resolve_region(&self, kind: ResourceKind, mut desired: DesiredResource) -> DesiredResource {
        if !kind.is_region_scoped() {
            desired.region = Some(self.config.global_region.clone());
        } else if desired.region.as_deref().map_or(true, str::is_empty) {
            desired.region = self.config.region.clone();
        }
        desired
    }

    fn check_desired(&self, kind: ResourceKind, desired: &DesiredResource) -> Result<(), ReconcileError> {
        if desired.region.is_none() {
            return Err(ReconcileError::invalid(
                kind,
                desired.name.as_str(),
                "No region given and no default region configured",
            ));
        }
        validation::validate_result(kind, desired)
    }

    fn listing_regions(&self, kind: ResourceKind, desired: &[DesiredResource]) -> Vec<String> {
        if !kind.is_region_scoped() {
            return vec![self.config.global_region.clone()];
        }
        desired
            .iter()
            .filter_map(|d| d.region.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    async fn execute(&self, kind: ResourceKind, change: PlannedChange) -> Outcome {
        let PlannedChange {
            binding,
            action,
            error,
        } = change;
        let name = binding.name().to_string();
        let region = binding.region().to_string();
        let Binding { desired, observed } = binding;

        if let Some(error) = error {
            return Outcome {
                name,
                region,
                action: Action::Noop,
                error: Some(error),
                record: observed,
            };
        }

        match (action, observed) {
            (PlannedAction::Create, _) => self.create(kind, desired, region).await,
            (PlannedAction::Update(changes), Some(record)) => {
                self.update(kind, record, changes).await
            },
            (PlannedAction::Destroy(dependents), Some(record)) => {
                self.destroy(kind, record, dependents).await
            },
            (_, record) => Outcome {
                name,
                region,
                action: Action::Noop,
                error: None,
                record,
            },
        }
    }

    async fn create(&self, kind: ResourceKind, desired: DesiredResource, region: String) -> Outcome {
        let mut attributes: Map<String, Value> = desired
            .attributes
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if kind.tags_after_create() {
            attributes.remove("tags");
        }
        let request = CreateRequest {
            name: desired.name.clone(),
            attributes,
        };

        info!(kind = %kind, name = %desired.name, region = %region, "Creating resource");
        let object = match self.api.create(kind, &region, &request).await {
            Ok(object) => object,
            Err(cause) => {
                return mutation_failed(kind, Operation::Create, cause, desired.name, region, None)
            },
        };

        let mut record = to_record(kind, &region, desired.name.clone(), &object);
        for (key, value) in request.attributes {
            record.attributes.entry(key).or_insert(value);
        }

        let error = match self.tag_created(kind, &desired, &region, &object.id).await {
            Ok(()) => {
                if let Some(tags) = desired.attributes.get("tags").filter(|v| !v.is_null()) {
                    record.attributes.insert("tags".to_string(), tags.clone());
                }
                None
            },
            Err(error) => Some(error),
        };

        info!(kind = %kind, name = %desired.name, id = %object.id, "Created resource");
        Outcome {
            name: desired.name,
            region,
            action: Action::Created,
            error,
            record: Some(record),
        }
    }

    async fn tag_created(
        &self,
        kind: ResourceKind,
        desired: &DesiredResource,
        region: &str,
        id: &str,
    ) -> Result<(), ReconcileError> {
        if !kind.tags_after_create() {
            return Ok(());
        }
        let mut tags = desired.tags();
        if let NameSource::Tag(tag) = kind.name_source() {
            tags.insert(tag.to_string(), desired.name.clone());
        }
        if tags.is_empty() {
            return Ok(());
        }

        const STEP: &str = "tag";
        let api = &self.api;
        let tags = &tags;
        match retry_bounded(&self.config.retry, STEP, move || api.tag(kind, region, id, tags)).await {
            Ok(attempts) => {
                if attempts > 1 {
                    info!(kind = %kind, name = %desired.name, attempts, "Tagged after retrying");
                }
                Ok(())
            },
            Err(Exhausted { attempts, last }) => Err(ReconcileError::RetryExhausted {
                step: STEP.to_string(),
                kind,
                name: desired.name.clone(),
                attempts,
                cause: last,
            }),
        }
    }

    async fn update(
        &self,
        kind: ResourceKind,
        mut record: ObservedRecord,
        changes: Vec<AttributeChange>,
    ) -> Outcome {
        info!(
            kind = %kind,
            name = %record.name,
            region = %record.region,
            changes = changes.len(),
            "Updating resource"
        );
        if let Err(cause) = self.api.update(kind, &record, &changes).await {
            let (name, region) = (record.name.clone(), record.region.clone());
            return mutation_failed(kind, Operation::Update, cause, name, region, Some(record));
        }

        for change in changes {
            match change.after {
                Some(value) => {
                    record.attributes.insert(change.path, value);
                },
                None => {
                    record.attributes.remove(&change.path);
                },
            }
        }
        Outcome {
            name: record.name.clone(),
            region: record.region.clone(),
            action: Action::Updated,
            error: None,
            record: Some(record),
        }
    }

    async fn destroy(
        &self,
        kind: ResourceKind,
        record: ObservedRecord,
        dependents: Vec<Dependent>,
    ) -> Outcome {
        let (name, region) = (record.name.clone(), record.region.clone());

        for dependent in &dependents {
            debug!(
                kind = %kind,
                name = %name,
                relation = %dependent.relation,
                target = %dependent.target,
                "Detaching dependent"
            );
            if let Err(cause) = self.api.detach(kind, &record, dependent).await {
                return mutation_failed(kind, Operation::Detach, cause, name, region, Some(record));
            }
        }

        info!(kind = %kind, name = %name, region = %region, id = %record.id(), "Deleting resource");
        if let Err(cause) = self.api.delete(kind, &record).await {
            return mutation_failed(kind, Operation::Delete, cause, name, region, Some(record));
        }

        Outcome {
            name,
            region,
            action: Action::Destroyed,
            error: None,
            record: None,
        }
    }
}

fn unbound(desired: DesiredResource) -> Binding {
    Binding {
        desired,
        observed: None,
    }
}

fn decide(kind: ResourceKind, binding: Binding) -> PlannedChange {
    let action = match (binding.desired.ensure, binding.observed.as_ref()) {
        (Ensure::Present, None) => Ok(PlannedAction::Create),
        (Ensure::Present, Some(observed)) => guard::plan_update(kind, &binding.desired, observed)
            .map(|changes| {
                if changes.is_empty() {
                    PlannedAction::Noop
                } else {
                    PlannedAction::Update(changes)
                }
            }),
        (Ensure::Absent, Some(observed)) => Ok(PlannedAction::Destroy(observed.dependents.clone())),
        (Ensure::Absent, None) => Ok(PlannedAction::Noop),
    };

    match action {
        Ok(action) => PlannedChange::new(binding, action),
        Err(error) => PlannedChange::rejected(binding, error),
    }
}

fn mutation_failed(
    kind: ResourceKind,
    operation: Operation,
    cause: ApiError,
    name: String,
    region: String,
    record: Option<ObservedRecord>,
) -> Outcome {
    Outcome {
        error: Some(ReconcileError::Mutation {
            kind,
            name: name.clone(),
            operation,
            cause,
        }),
        name,
        region,
        action: Action::Noop,
        record,
    }
}
