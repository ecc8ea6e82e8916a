use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Learner identity as issued by the external identity provider.
    UserId
);
string_id!(CourseId);
string_id!(
    /// Module identifier, stable for the lifetime of the course.
    ModuleId
);
string_id!(ContentId);
string_id!(QuestionId);
string_id!(AnswerId);
string_id!(
    /// Backend-issued certificate identity. Repeated issuance for the same
    /// learner and course yields the same value.
    CertificateId
);

/// The (user, course) pair that scopes every piece of mutable progress state.
///
/// Completion sets, cached progress and attempt history all carry one of these,
/// so a value belonging to one learner can never be written under another's key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LearnerCourse {
    pub user_id: UserId,
    pub course_id: CourseId,
}

impl LearnerCourse {
    pub fn new(user_id: impl Into<UserId>, course_id: impl Into<CourseId>) -> Self {
        Self {
            user_id: user_id.into(),
            course_id: course_id.into(),
        }
    }
}

impl fmt::Display for LearnerCourse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.course_id)
    }
}
