//! Utilisateurs, groupes et droits géographiques

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::VigieError;

/// Rôle global d'un utilisateur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserRole {
    SuperAdmin,
    Admin,
    Regular,
}

impl UserRole {
    /// Représentation texte stockée en base
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "SUPER_ADMIN",
            Self::Admin => "ADMIN",
            Self::Regular => "REGULAR",
        }
    }
}

impl FromStr for UserRole {
    type Err = VigieError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SUPER_ADMIN" => Ok(Self::SuperAdmin),
            "ADMIN" => Ok(Self::Admin),
            "REGULAR" => Ok(Self::Regular),
            _ => Err(VigieError::invalid_value("user role", value)),
        }
    }
}

/// Droit détenu par un groupe sur sa juridiction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupRight {
    Write,
    Annotate,
    Read,
}

impl GroupRight {
    /// Représentation texte stockée en base
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "WRITE",
            Self::Annotate => "ANNOTATE",
            Self::Read => "READ",
        }
    }

    /// L'ensemble des trois droits, accordé au super-rôle
    pub fn all() -> BTreeSet<GroupRight> {
        BTreeSet::from([Self::Write, Self::Annotate, Self::Read])
    }
}

impl FromStr for GroupRight {
    type Err = VigieError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "WRITE" => Ok(Self::Write),
            "ANNOTATE" => Ok(Self::Annotate),
            "READ" => Ok(Self::Read),
            _ => Err(VigieError::invalid_value("group right", value)),
        }
    }
}

impl fmt::Display for GroupRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Un utilisateur du système
#[derive(Debug, Clone)]
pub struct User {
    /// Identifiant unique de l'utilisateur
    pub id: Uuid,

    /// Adresse email (unique)
    pub email: String,

    /// Rôle global
    pub role: UserRole,
}

impl User {
    /// Vrai pour le super-rôle, qui court-circuite toute restriction d'accès
    pub fn is_super(&self) -> bool {
        self.role == UserRole::SuperAdmin
    }
}

/// Un groupe d'utilisateurs et sa juridiction géographique
#[derive(Debug, Clone)]
pub struct UserGroup {
    /// Identifiant unique du groupe
    pub id: Uuid,

    /// Nom unique du groupe
    pub name: String,

    /// Zones administratives formant la juridiction du groupe
    pub zone_ids: Vec<Uuid>,

    /// Zones personnalisées rattachées au groupe
    pub custom_zone_ids: Vec<Uuid>,

    /// Catégories de types d'objets accessibles aux membres
    pub category_ids: Vec<Uuid>,
}

/// L'appartenance d'un utilisateur à un groupe, avec ses droits
///
/// Unique par paire (utilisateur, groupe).
#[derive(Debug, Clone)]
pub struct GroupMembership {
    /// Utilisateur membre
    pub user_id: Uuid,

    /// Groupe d'appartenance
    pub group_id: Uuid,

    /// Droits détenus via cette appartenance
    pub rights: BTreeSet<GroupRight>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_super() {
        let mut user = User {
            id: Uuid::new_v4(),
            email: "agent@collectivite.fr".to_string(),
            role: UserRole::SuperAdmin,
        };
        assert!(user.is_super());

        user.role = UserRole::Admin;
        assert!(!user.is_super());

        user.role = UserRole::Regular;
        assert!(!user.is_super());
    }

    #[test]
    fn test_all_rights() {
        let all = GroupRight::all();
        assert_eq!(all.len(), 3);
        assert!(all.contains(&GroupRight::Write));
        assert!(all.contains(&GroupRight::Annotate));
        assert!(all.contains(&GroupRight::Read));
    }

    #[test]
    fn test_group_right_round_trip() {
        for right in [GroupRight::Write, GroupRight::Annotate, GroupRight::Read] {
            assert_eq!(right.as_str().parse::<GroupRight>().unwrap(), right);
        }
        assert!("DELETE".parse::<GroupRight>().is_err());
    }
}
