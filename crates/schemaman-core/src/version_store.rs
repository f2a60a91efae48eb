//! Record reads and writes through the version-management tiers.
//!
//! Writes land in the caller's working draft unless they ask for an
//! immediate commit or opt out of version management. Reads resolve
//! through the caller's draft, the head, pending change-list entries or
//! the commit log depending on the options given.

use std::collections::BTreeMap;

use chrono::Utc;
use schemaman_state::{
    ChangeListEntry, ChangeListState, CommitVersion, HeadRow, KeyFilter, Qualifier, Record,
    RecordId, Row, RowKey, Surface, Transaction, UserId, VersionNumber, WorkingVersion,
};
use tracing::{debug, instrument};

use crate::commit_log;
use crate::context::RequestContext;
use crate::error::{Result, VcmError};
use crate::history::RecordVersions;
use crate::obs;
use crate::predicate::Predicate;
use crate::resolve::{lookup_chain, Candidates, Hit, ResolvedRecord, Step};

/// Options for [`VersionStore::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Promote the write straight to a commit
    pub commit_version: bool,
    /// `false` writes the head row directly, bypassing drafts and the log
    pub version_management: bool,
    /// Rewrite the pending change-list entry holding this version
    pub version_number: Option<VersionNumber>,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            commit_version: false,
            version_management: true,
            version_number: None,
        }
    }
}

impl SetOptions {
    pub fn commit() -> Self {
        Self {
            commit_version: true,
            ..Self::default()
        }
    }

    pub fn unversioned() -> Self {
        Self {
            version_management: false,
            ..Self::default()
        }
    }

    pub fn at_version(version: VersionNumber) -> Self {
        Self {
            version_number: Some(version),
            ..Self::default()
        }
    }
}

/// Options for [`VersionStore::get`] and [`VersionStore::filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    /// Read exactly this version; working drafts are not consulted
    pub version_number: Option<VersionNumber>,
    pub use_working_version: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            version_number: None,
            use_working_version: true,
        }
    }
}

impl GetOptions {
    pub fn version(version: VersionNumber) -> Self {
        Self {
            version_number: Some(version),
            ..Self::default()
        }
    }

    /// Read the published value, ignoring the caller's draft.
    pub fn head() -> Self {
        Self {
            use_working_version: false,
            ..Self::default()
        }
    }
}

/// Options for [`VersionStore::delete`] and [`VersionStore::delete_filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    pub commit_version: bool,
    pub version_management: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            commit_version: false,
            version_management: true,
        }
    }
}

impl DeleteOptions {
    pub fn commit() -> Self {
        Self {
            commit_version: true,
            ..Self::default()
        }
    }

    pub fn unversioned() -> Self {
        Self {
            version_management: false,
            ..Self::default()
        }
    }
}

/// Version-aware record access for one request.
pub struct VersionStore<'a> {
    ctx: &'a RequestContext,
}

impl<'a> VersionStore<'a> {
    pub(crate) fn new(ctx: &'a RequestContext) -> Self {
        Self { ctx }
    }

    /// Write a record.
    ///
    /// With `record_id == None` a new id is allocated and returned; updates
    /// return `None`. With `version_number` set, the pending change-list
    /// entry holding that version is rewritten in place and
    /// `commit_version` is ignored.
    #[instrument(skip(self, data), fields(user = %self.ctx.user_id()))]
    pub async fn set(
        &self,
        table: &str,
        record_id: Option<RecordId>,
        data: Record,
        options: SetOptions,
    ) -> Result<Option<RecordId>> {
        if let Some(version) = options.version_number {
            let record_id = record_id.ok_or_else(|| {
                VcmError::InvalidRequest(format!(
                    "rewriting version {version} in {table} needs a record id"
                ))
            })?;
            self.rewrite_pending(table, record_id, version, data).await?;
            return Ok(None);
        }

        let (record_id, inserted) = match record_id {
            Some(id) => (id, false),
            None => (self.allocate_record_id(table).await?, true),
        };

        if options.version_management {
            self.write_drafts(
                table,
                vec![(record_id, Some(data))],
                options.commit_version,
                inserted,
            )
            .await?;
        } else {
            let row = HeadRow {
                version: None,
                data,
                updated_at: Utc::now(),
            };
            let mut tx = self.ctx.begin();
            if inserted {
                tx.expect(RowKey::head(table, record_id), None);
            }
            tx.put_row(RowKey::head(table, record_id), &row)?;
            tx.commit().await?;
            debug!(table, record_id = %record_id, "unversioned head write");
        }

        Ok(inserted.then_some(record_id))
    }

    /// Read one record's value.
    pub async fn get(
        &self,
        table: &str,
        record_id: RecordId,
        options: GetOptions,
    ) -> Result<Option<Record>> {
        Ok(self
            .get_resolved(table, record_id, options)
            .await?
            .map(|r| r.data))
    }

    /// Read one record, reporting which surface the value came from.
    ///
    /// An explicit version that exists nowhere fails `NotFound`; otherwise an
    /// unresolvable record is `Ok(None)`.
    pub async fn get_resolved(
        &self,
        table: &str,
        record_id: RecordId,
        options: GetOptions,
    ) -> Result<Option<ResolvedRecord>> {
        let chain = lookup_chain(
            options.version_number,
            options.use_working_version,
            self.ctx.user_id(),
        );
        for step in chain {
            if let Some(hit) = self.lookup(table, record_id, step).await? {
                return Ok(hit.into_resolved(table, record_id));
            }
        }
        match options.version_number {
            Some(version) => Err(VcmError::NotFound(format!(
                "version {version} of {table}/{record_id}"
            ))),
            None => Ok(None),
        }
    }

    /// Records of `table` matching `predicate`, resolved per record the same
    /// way [`VersionStore::get`] resolves, ordered by record id.
    ///
    /// With an explicit version, records lacking that version are skipped.
    pub async fn filter(
        &self,
        table: &str,
        predicate: &Predicate,
        options: GetOptions,
    ) -> Result<Vec<ResolvedRecord>> {
        let user = self.ctx.user_id();
        let driver = self.ctx.driver();
        let mut candidates: BTreeMap<RecordId, Candidates> = BTreeMap::new();

        match options.version_number {
            Some(version) => {
                let pending = driver
                    .raw_filter(&KeyFilter::surface(Surface::ChangeList).table(table))
                    .await?;
                for row in pending {
                    let entry: ChangeListEntry = row.decode()?;
                    if entry.version_number == version {
                        let id = entry.record_id;
                        candidates.entry(id).or_default().pending = Some(entry);
                    }
                }
                let commits = driver
                    .raw_filter(
                        &KeyFilter::surface(Surface::CommitLog)
                            .table(table)
                            .qualifier(Qualifier::Version(version)),
                    )
                    .await?;
                for row in commits {
                    let commit: CommitVersion = row.decode()?;
                    let id = commit.record_id;
                    candidates.entry(id).or_default().commit = Some(commit);
                }
            }
            None => {
                let heads = driver
                    .raw_filter(&KeyFilter::surface(Surface::Head).table(table))
                    .await?;
                for row in heads {
                    let head: HeadRow = row.decode()?;
                    candidates.entry(row.key.record_id).or_default().head = Some(head);
                }
                if options.use_working_version {
                    let drafts = driver
                        .raw_filter(
                            &KeyFilter::surface(Surface::Working)
                                .table(table)
                                .qualifier(Qualifier::User(user)),
                        )
                        .await?;
                    for row in drafts {
                        let draft: WorkingVersion = row.decode()?;
                        let id = draft.record_id;
                        candidates.entry(id).or_default().working = Some(draft);
                    }
                }
            }
        }

        let chain = lookup_chain(options.version_number, options.use_working_version, user);
        Ok(candidates
            .into_iter()
            .filter_map(|(record_id, c)| c.resolve(&chain)?.into_resolved(table, record_id))
            .filter(|r| predicate.matches(&r.data))
            .collect())
    }

    /// Delete one record.
    ///
    /// Under version management this writes a deletion draft (committed
    /// immediately with `commit_version`). Fails `NotFound` when the record
    /// does not resolve for the caller.
    #[instrument(skip(self), fields(user = %self.ctx.user_id()))]
    pub async fn delete(
        &self,
        table: &str,
        record_id: RecordId,
        options: DeleteOptions,
    ) -> Result<()> {
        if !options.version_management {
            let key = RowKey::head(table, record_id);
            let mut tx = self.ctx.begin();
            if tx.get_for_update(&key).await?.is_none() {
                return Err(VcmError::NotFound(format!("{table}/{record_id}")));
            }
            tx.delete(key);
            tx.commit().await?;
            debug!(table, record_id = %record_id, "unversioned head delete");
            return Ok(());
        }

        if self
            .get_resolved(table, record_id, GetOptions::default())
            .await?
            .is_none()
        {
            return Err(VcmError::NotFound(format!("{table}/{record_id}")));
        }
        self.write_drafts(table, vec![(record_id, None)], options.commit_version, false)
            .await?;
        Ok(())
    }

    /// Delete every record of `table` matching `predicate`, in one
    /// transaction. Returns the number of records deleted.
    #[instrument(skip(self, predicate), fields(user = %self.ctx.user_id()))]
    pub async fn delete_filter(
        &self,
        table: &str,
        predicate: &Predicate,
        options: DeleteOptions,
    ) -> Result<usize> {
        let read = if options.version_management {
            GetOptions::default()
        } else {
            GetOptions::head()
        };
        let matched: Vec<RecordId> = self
            .filter(table, predicate, read)
            .await?
            .into_iter()
            .map(|r| r.record_id)
            .collect();
        if matched.is_empty() {
            return Ok(0);
        }

        if options.version_management {
            let drafts = matched.iter().map(|id| (*id, None)).collect();
            self.write_drafts(table, drafts, options.commit_version, false)
                .await?;
        } else {
            let mut tx = self.ctx.begin();
            for id in &matched {
                let key = RowKey::head(table, *id);
                tx.get_for_update(&key).await?;
                tx.delete(key);
            }
            tx.commit().await?;
        }
        Ok(matched.len())
    }

    /// Lazily enumerate every version of a record visible to `user`.
    pub fn record_versions_available(
        &self,
        table: &str,
        record_id: RecordId,
        user: UserId,
    ) -> RecordVersions {
        RecordVersions::new(self.ctx.driver().clone(), table, record_id, user)
    }

    /// Promote the caller's draft of a record into a new commit.
    #[instrument(skip(self), fields(user = %self.ctx.user_id()))]
    pub async fn commit_working_version(
        &self,
        table: &str,
        record_id: RecordId,
    ) -> Result<VersionNumber> {
        let mut tx = self.ctx.begin();
        let commit =
            commit_log::promote_working(&mut tx, table, record_id, self.ctx.user_id()).await?;
        commit_log::apply(tx).await?;
        obs::emit_version_committed(table, record_id, commit.version_number, None);
        Ok(commit.version_number)
    }

    /// Discard the caller's draft of a record. Returns whether one existed.
    pub async fn abandon_working_version(&self, table: &str, record_id: RecordId) -> Result<bool> {
        let user = self.ctx.user_id();
        let key = RowKey::working(table, record_id, user);
        let driver = self.ctx.driver();
        if driver.raw_get(&key).await?.is_none() {
            return Ok(false);
        }
        driver.raw_delete(&key).await?;
        obs::emit_working_abandoned(table, record_id, user);
        Ok(true)
    }

    /// Next id from the table's record sequence that no surface uses yet.
    ///
    /// Explicit ids written through `set(Some(id), ..)` never advance the
    /// sequence, so occupied ids are skipped here.
    async fn allocate_record_id(&self, table: &str) -> Result<RecordId> {
        let driver = self.ctx.driver();
        let sequence = commit_log::record_sequence(table);
        loop {
            let candidate = RecordId(driver.next_sequence(&sequence).await?);
            if !self.record_id_in_use(table, candidate).await? {
                return Ok(candidate);
            }
            debug!(table, record_id = %candidate, "skipping occupied record id");
        }
    }

    async fn record_id_in_use(&self, table: &str, record_id: RecordId) -> Result<bool> {
        let driver = self.ctx.driver();
        if driver.raw_get(&RowKey::head(table, record_id)).await?.is_some() {
            return Ok(true);
        }
        for surface in [
            Surface::Working,
            Surface::ChangeList,
            Surface::CommitLog,
            Surface::Latest,
        ] {
            let rows = driver
                .raw_filter(&KeyFilter::surface(surface).table(table).record(record_id))
                .await?;
            if !rows.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn lookup(&self, table: &str, record_id: RecordId, step: Step) -> Result<Option<Hit>> {
        let driver = self.ctx.driver();
        let hit = match step {
            Step::Head => driver
                .raw_get(&RowKey::head(table, record_id))
                .await?
                .map(serde_json::from_value::<HeadRow>)
                .transpose()?
                .map(Hit::head),
            Step::Working(user) => driver
                .raw_get(&RowKey::working(table, record_id, user))
                .await?
                .map(serde_json::from_value::<WorkingVersion>)
                .transpose()?
                .map(Hit::working),
            Step::Commit(version) => driver
                .raw_get(&RowKey::commit(table, record_id, version))
                .await?
                .map(serde_json::from_value::<CommitVersion>)
                .transpose()?
                .map(Hit::commit),
            Step::PendingEntry(version) => {
                let rows = driver
                    .raw_filter(
                        &KeyFilter::surface(Surface::ChangeList)
                            .table(table)
                            .record(record_id),
                    )
                    .await?;
                find_pending(rows, version)?.map(|(_, entry)| Hit::pending(entry))
            }
        };
        Ok(hit)
    }

    /// Stage a draft of `record_id` for the caller, keeping the base version
    /// of any draft it replaces.
    async fn stage_draft(
        &self,
        tx: &mut Transaction,
        table: &str,
        record_id: RecordId,
        data: Option<Record>,
    ) -> Result<()> {
        let user = self.ctx.user_id();
        let key = RowKey::working(table, record_id, user);
        let base_version = match tx.get_as::<WorkingVersion>(&key).await? {
            Some(existing) => existing.base_version,
            None => tx
                .get_as::<HeadRow>(&RowKey::head(table, record_id))
                .await?
                .and_then(|head| head.version),
        };
        let draft = WorkingVersion {
            table: table.to_string(),
            record_id,
            user_id: user,
            data,
            base_version,
            updated_at: Utc::now(),
        };
        tx.put_row(key, &draft)?;
        Ok(())
    }

    /// Save drafts, then promote them to commits when `commit` is set.
    /// Either way all of them land in one transaction. With `claim`, the
    /// batch fails if another writer created any of the records first.
    async fn write_drafts(
        &self,
        table: &str,
        drafts: Vec<(RecordId, Option<Record>)>,
        commit: bool,
        claim: bool,
    ) -> Result<Vec<CommitVersion>> {
        let user = self.ctx.user_id();
        let mut tx = self.ctx.begin();
        for (record_id, data) in &drafts {
            if claim {
                tx.expect(RowKey::head(table, *record_id), None);
            }
            self.stage_draft(&mut tx, table, *record_id, data.clone())
                .await?;
        }

        if !commit {
            tx.commit().await?;
            for (record_id, data) in &drafts {
                obs::emit_working_saved(table, *record_id, user, data.is_none());
            }
            return Ok(Vec::new());
        }

        let mut commits = Vec::with_capacity(drafts.len());
        for (record_id, _) in &drafts {
            commits.push(commit_log::promote_working(&mut tx, table, *record_id, user).await?);
        }
        commit_log::apply(tx).await?;
        for commit in &commits {
            obs::emit_version_committed(table, commit.record_id, commit.version_number, None);
        }
        Ok(commits)
    }

    async fn rewrite_pending(
        &self,
        table: &str,
        record_id: RecordId,
        version: VersionNumber,
        data: Record,
    ) -> Result<()> {
        let mut tx = self.ctx.begin();
        let rows = tx
            .filter(
                &KeyFilter::surface(Surface::ChangeList)
                    .table(table)
                    .record(record_id),
            )
            .await?;

        let Some((row, mut entry)) = find_pending(rows, version)? else {
            let committed = self
                .ctx
                .driver()
                .raw_get(&RowKey::commit(table, record_id, version))
                .await?;
            return Err(match committed {
                Some(_) => VcmError::InvalidState {
                    subject: format!("version {version} of {table}/{record_id}"),
                    state: ChangeListState::Committed.to_string(),
                    expected: ChangeListState::Open.to_string(),
                },
                None => VcmError::NotFound(format!("version {version} of {table}/{record_id}")),
            });
        };

        tx.expect(row.key.clone(), Some(row.value));
        entry.data = Some(data);
        entry.staged_at = Utc::now();
        tx.put_row(row.key, &entry)?;
        commit_log::apply(tx).await?;
        debug!(table, record_id = %record_id, version = %version, "pending entry rewritten");
        Ok(())
    }
}

/// The pending entry holding `version` among a record's change-list rows.
fn find_pending(rows: Vec<Row>, version: VersionNumber) -> Result<Option<(Row, ChangeListEntry)>> {
    for row in rows {
        let entry: ChangeListEntry = row.decode()?;
        if entry.version_number == version {
            return Ok(Some((row, entry)));
        }
    }
    Ok(None)
}
