use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::ParticipantId;

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), GrandstandError>`].
///
/// [`Result<(), GrandstandError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GrandstandError {
    /// A play session is already active. End the current session before beginning another.
    AlreadyPlaying,
    /// The given participant id is at or below the reserved sentinel floor and can never be watched.
    InvalidParticipant {
        /// The participant id that was rejected.
        id: ParticipantId,
    },
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
}

impl Display for GrandstandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrandstandError::AlreadyPlaying => {
                write!(
                    f,
                    "Cannot begin playing while a play session is already active."
                )
            }
            GrandstandError::InvalidParticipant { id } => {
                write!(
                    f,
                    "Participant {} is reserved and cannot be a watch target.",
                    id
                )
            }
            GrandstandError::InvalidRequest { info } => {
                write!(f, "Invalid Request: {}", info)
            }
        }
    }
}

impl Error for GrandstandError {}
