use crate::android::signatures::Signatures;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SignaturesDiff {
    pub old: Signatures,
    pub new: Signatures,
}

impl SignaturesDiff {
    pub fn new(old: &Signatures, new: &Signatures) -> SignaturesDiff {
        SignaturesDiff { old: old.clone(), new: new.clone() }
    }

    pub fn changed(&self) -> bool {
        self.old != self.new
    }
}
