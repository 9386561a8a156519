// EN: src/core/flag_groups.rs

use crate::core::context::Context;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// The presence constraint a [`FlagGroup`] enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// At most one member may be set.
    MutuallyExclusive,
    /// Either no member or every member must be set.
    AllOrNone,
    /// Exactly one member must be set.
    ExactlyOne,
    /// At least one member must be set.
    AtLeastOne,
}

impl GroupKind {
    /// Evaluates the constraint given how many of `total` members are present.
    pub fn is_satisfied(self, present: usize, total: usize) -> bool {
        match self {
            Self::MutuallyExclusive => present <= 1,
            Self::AllOrNone => present == 0 || present == total,
            Self::ExactlyOne => present == 1,
            Self::AtLeastOne => present >= 1,
        }
    }

    /// "All or none" pulls members together while the exclusive kinds push
    /// them apart, so one flag cannot sit in groups of both families.
    fn conflicts_with(self, other: Self) -> bool {
        let exclusive = |k: Self| matches!(k, Self::MutuallyExclusive | Self::ExactlyOne);
        (self == Self::AllOrNone && exclusive(other)) || (other == Self::AllOrNone && exclusive(self))
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::MutuallyExclusive => "mutually exclusive",
            Self::AllOrNone => "all or none",
            Self::ExactlyOne => "exactly one",
            Self::AtLeastOne => "at least one",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlagGroupError {
    #[error("{}", violation_message(.group, .kind, .present, .members))]
    Violation {
        group: String,
        kind: GroupKind,
        /// Members that were set, in member order.
        present: Vec<String>,
        members: Vec<String>,
    },
    #[error("Flag group '{group}' has no members.")]
    Empty { group: String },
    #[error("Flag group '{group}' lists flag '--{flag}' more than once.")]
    DuplicateMember { group: String, flag: String },
    #[error(
        "Flag '--{flag}' cannot belong to both '{first}' ({first_kind}) and '{second}' ({second_kind})."
    )]
    ConflictingMembership {
        flag: String,
        first: String,
        first_kind: GroupKind,
        second: String,
        second_kind: GroupKind,
    },
}

fn dashed(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("--{}", n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn violation_message(group: &str, kind: &GroupKind, present: &[String], members: &[String]) -> String {
    match kind {
        GroupKind::MutuallyExclusive => format!(
            "Flags {} cannot be used together (group '{}' allows at most one of {}).",
            dashed(present),
            group,
            dashed(members)
        ),
        GroupKind::AllOrNone => {
            let missing: Vec<String> = members
                .iter()
                .filter(|m| !present.contains(m))
                .cloned()
                .collect();
            format!(
                "Flags in group '{}' must be used together: got {}, missing {}.",
                group,
                dashed(present),
                dashed(&missing)
            )
        }
        GroupKind::ExactlyOne if present.is_empty() => format!(
            "Group '{}' requires exactly one of {}, but none was given.",
            group,
            dashed(members)
        ),
        GroupKind::ExactlyOne => format!(
            "Group '{}' requires exactly one of {}, but got {}.",
            group,
            dashed(members),
            dashed(present)
        ),
        GroupKind::AtLeastOne => format!(
            "Group '{}' requires at least one of {}.",
            group,
            dashed(members)
        ),
    }
}

// --- Group Definition ---

/// A named set of flags subject to a presence constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagGroup {
    name: String,
    description: String,
    kind: GroupKind,
    members: Vec<String>,
}

impl FlagGroup {
    /// Declares a group. Members must be unique and non-empty.
    pub fn new<I, S>(name: impl Into<String>, kind: GroupKind, members: I) -> Result<Self, FlagGroupError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let members: Vec<String> = members.into_iter().map(Into::into).collect();
        if members.is_empty() {
            return Err(FlagGroupError::Empty { group: name });
        }
        let mut seen = HashSet::with_capacity(members.len());
        for member in &members {
            if !seen.insert(member.as_str()) {
                return Err(FlagGroupError::DuplicateMember {
                    group: name,
                    flag: member.clone(),
                });
            }
        }
        Ok(Self {
            name,
            description: String::new(),
            kind,
            members,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Checks the constraint against the flags the user set in `ctx`.
    pub fn evaluate(&self, ctx: &Context) -> Result<(), FlagGroupError> {
        let present: Vec<String> = self
            .members
            .iter()
            .filter(|m| ctx.is_set(m))
            .cloned()
            .collect();

        if self.kind.is_satisfied(present.len(), self.members.len()) {
            return Ok(());
        }
        Err(FlagGroupError::Violation {
            group: self.name.clone(),
            kind: self.kind,
            present,
            members: self.members.clone(),
        })
    }
}

/// The flag groups declared on one command.
#[derive(Debug, Clone, Default)]
pub struct FlagGroups {
    groups: Vec<FlagGroup>,
}

impl FlagGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a group, rejecting it when one of its members already belongs
    /// to a group of a conflicting kind.
    pub fn add(&mut self, group: FlagGroup) -> Result<&mut Self, FlagGroupError> {
        for existing in &self.groups {
            if !existing.kind.conflicts_with(group.kind) {
                continue;
            }
            if let Some(flag) = group.members.iter().find(|m| existing.members.contains(m)) {
                return Err(FlagGroupError::ConflictingMembership {
                    flag: flag.clone(),
                    first: existing.name.clone(),
                    first_kind: existing.kind,
                    second: group.name.clone(),
                    second_kind: group.kind,
                });
            }
        }
        self.groups.push(group);
        Ok(self)
    }

    pub fn groups(&self) -> &[FlagGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Returns the first violation, in declaration order.
    pub fn validate(&self, ctx: &Context) -> Result<(), FlagGroupError> {
        for group in &self.groups {
            group.evaluate(ctx)?;
        }
        Ok(())
    }

    /// Returns every violation, in declaration order.
    pub fn violations(&self, ctx: &Context) -> Vec<FlagGroupError> {
        self.groups
            .iter()
            .filter_map(|g| g.evaluate(ctx).err())
            .collect()
    }
}
