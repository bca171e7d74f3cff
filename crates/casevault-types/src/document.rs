//! The plaintext session document.
//!
//! This is the decrypted in-memory state the form layer reads and writes. Field
//! names serialize in camelCase so blobs written by earlier releases keep
//! decoding after an upgrade.

use serde::{Deserialize, Serialize};

/// Purpose pre-filled on every new ROI. Not PHI on its own.
pub const DEFAULT_ROI_PURPOSE: &str = "Continuity of care";

/// Identifier of the first ROI instance in a fresh document.
pub const FIRST_ROI_ID: &str = "roi-1";

/// Client identity section.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct GeneralInfo {
    pub first_name: String,
    pub last_name: String,
    pub dob: String,
}

/// Non-PHI staff identity. Survives locks and wipes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct StaffProfile {
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

impl StaffProfile {
    pub fn full_name(&self) -> String {
        join_name(&self.first_name, &self.last_name)
    }
}

/// One Release of Information instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct RoiInstance {
    pub id: String,
    pub purpose: String,
    pub recipient: String,
    pub notes: String,
    pub summary: String,
    /// Signature image as a data URL.
    pub signature: String,
    pub parent_signature: String,
    pub date: String,
    pub time: String,
    pub sig_locked: bool,
    pub parent_sig_locked: bool,
}

impl RoiInstance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            purpose: DEFAULT_ROI_PURPOSE.to_string(),
            recipient: String::new(),
            notes: String::new(),
            summary: String::new(),
            signature: String::new(),
            parent_signature: String::new(),
            date: String::new(),
            time: String::new(),
            sig_locked: false,
            parent_sig_locked: false,
        }
    }

    fn has_phi(&self) -> bool {
        let custom_purpose = !self.purpose.is_empty() && self.purpose != DEFAULT_ROI_PURPOSE;
        custom_purpose
            || !self.recipient.is_empty()
            || !self.notes.is_empty()
            || !self.summary.is_empty()
            || !self.signature.is_empty()
            || !self.parent_signature.is_empty()
    }
}

impl Default for RoiInstance {
    fn default() -> Self {
        Self::new(FIRST_ROI_ID)
    }
}

/// All ROI instances plus the one currently shown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct RoiSet {
    pub active_id: String,
    pub instances: Vec<RoiInstance>,
}

impl Default for RoiSet {
    fn default() -> Self {
        Self {
            active_id: FIRST_ROI_ID.to_string(),
            instances: vec![RoiInstance::new(FIRST_ROI_ID)],
        }
    }
}

/// Notice of privacy practices acknowledgement.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct NoticeForm {
    pub summary1: String,
    pub summary2: String,
    pub summary3: String,
    pub signature: String,
    pub date: String,
    pub time: String,
    pub sig_locked: bool,
}

/// The whole in-memory session state.
///
/// Only [`SessionDocument::case_payload`] is ever encrypted and persisted; the
/// staff section lives in its own partition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct SessionDocument {
    pub current_view: String,
    pub general: GeneralInfo,
    pub staff: StaffProfile,
    pub roi: RoiSet,
    pub notice: NoticeForm,
}

impl Default for SessionDocument {
    fn default() -> Self {
        Self {
            current_view: "general".to_string(),
            general: GeneralInfo::default(),
            staff: StaffProfile::default(),
            roi: RoiSet::default(),
            notice: NoticeForm::default(),
        }
    }
}

/// The encrypted portion of a session document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CasePayload {
    #[serde(default)]
    pub current_view: String,
    #[serde(default)]
    pub general: GeneralInfo,
    #[serde(default)]
    pub roi: RoiSet,
    #[serde(default)]
    pub notice: NoticeForm,
}

impl SessionDocument {
    /// A fresh document carrying only the given staff profile.
    pub fn with_staff(staff: StaffProfile) -> Self {
        Self {
            staff,
            ..Self::default()
        }
    }

    /// Whether the document holds any reportable client information.
    pub fn has_phi(&self) -> bool {
        let general = &self.general;
        let notice = &self.notice;
        !general.first_name.is_empty()
            || !general.last_name.is_empty()
            || !general.dob.is_empty()
            || self.roi.instances.iter().any(RoiInstance::has_phi)
            || !notice.summary1.is_empty()
            || !notice.summary2.is_empty()
            || !notice.summary3.is_empty()
            || !notice.signature.is_empty()
    }

    /// The section that gets sealed into the session blob.
    pub fn case_payload(&self) -> CasePayload {
        CasePayload {
            current_view: self.current_view.clone(),
            general: self.general.clone(),
            roi: self.roi.clone(),
            notice: self.notice.clone(),
        }
    }

    /// Rebuild a document from a decrypted payload, keeping the given staff.
    pub fn from_payload(payload: CasePayload, staff: StaffProfile) -> Self {
        let mut doc = Self::with_staff(staff);
        if !payload.current_view.is_empty() {
            doc.current_view = payload.current_view;
        }
        doc.general = payload.general;
        if !payload.roi.instances.is_empty() {
            doc.roi = payload.roi;
        }
        doc.notice = payload.notice;
        doc
    }

    /// The ROI currently shown, falling back to the first one.
    pub fn active_roi(&self) -> Option<&RoiInstance> {
        self.roi
            .instances
            .iter()
            .find(|roi| roi.id == self.roi.active_id)
            .or_else(|| self.roi.instances.first())
    }

    /// Apply `patch` to the active ROI in place.
    pub fn upsert_active_roi(&mut self, patch: impl FnOnce(&mut RoiInstance)) {
        let active = self.roi.active_id.clone();
        if let Some(roi) = self.roi.instances.iter_mut().find(|roi| roi.id == active) {
            patch(roi);
        }
    }

    /// Append a new ROI instance, make it active, and return its id.
    pub fn add_roi(&mut self) -> String {
        let mut n = self.roi.instances.len() + 1;
        let mut id = format!("roi-{n}");
        while self.roi.instances.iter().any(|roi| roi.id == id) {
            n += 1;
            id = format!("roi-{n}");
        }
        self.roi.instances.push(RoiInstance::new(id.clone()));
        self.roi.active_id = id.clone();
        id
    }

    pub fn client_full_name(&self) -> String {
        join_name(&self.general.first_name, &self.general.last_name)
    }

    pub fn staff_full_name(&self) -> String {
        self.staff.full_name()
    }
}

fn join_name(first: &str, last: &str) -> String {
    [first, last]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_document_has_no_phi() {
        let doc = SessionDocument::default();
        assert!(!doc.has_phi());
        assert_eq!(doc.roi.instances.len(), 1);
        assert_eq!(doc.active_roi().map(|r| r.purpose.as_str()), Some(DEFAULT_ROI_PURPOSE));
    }

    #[test]
    fn test_staff_alone_is_not_phi() {
        let doc = SessionDocument::with_staff(StaffProfile {
            first_name: "Dana".into(),
            last_name: "Lee".into(),
            role: "Case Manager".into(),
        });
        assert!(!doc.has_phi());
        assert_eq!(doc.staff_full_name(), "Dana Lee");
    }

    #[test]
    fn test_general_field_is_phi() {
        let mut doc = SessionDocument::default();
        doc.general.first_name = "A".into();
        assert!(doc.has_phi());
    }

    #[test]
    fn test_roi_fields_are_phi() {
        let mut doc = SessionDocument::default();
        doc.upsert_active_roi(|roi| roi.recipient = "County Clinic".into());
        assert!(doc.has_phi());

        let mut doc = SessionDocument::default();
        doc.upsert_active_roi(|roi| roi.purpose = "Legal".into());
        assert!(doc.has_phi());
    }

    #[test]
    fn test_notice_signature_is_phi() {
        let mut doc = SessionDocument::default();
        doc.notice.signature = "data:image/png;base64,AAAA".into();
        assert!(doc.has_phi());
    }

    #[test]
    fn test_add_roi_activates_new_instance() {
        let mut doc = SessionDocument::default();
        let id = doc.add_roi();
        assert_eq!(id, "roi-2");
        assert_eq!(doc.roi.active_id, "roi-2");
        doc.upsert_active_roi(|roi| roi.notes = "n".into());
        assert_eq!(doc.roi.instances[0].notes, "");
        assert_eq!(doc.roi.instances[1].notes, "n");
    }

    #[test]
    fn test_payload_excludes_staff() {
        let mut doc = SessionDocument::with_staff(StaffProfile {
            first_name: "Dana".into(),
            ..StaffProfile::default()
        });
        doc.general.first_name = "A".into();
        let json = serde_json::to_value(doc.case_payload()).expect("serialize");
        assert!(json.get("staff").is_none());
        assert_eq!(json["general"]["firstName"], "A");
    }

    #[test]
    fn test_from_payload_tolerates_missing_sections() {
        let payload: CasePayload =
            serde_json::from_str(r#"{"general":{"firstName":"A"}}"#).expect("parse");
        let doc = SessionDocument::from_payload(payload, StaffProfile::default());
        assert_eq!(doc.general.first_name, "A");
        assert_eq!(doc.current_view, "general");
        assert_eq!(doc.roi.instances.len(), 1);
    }

    #[test]
    fn test_client_full_name_skips_blanks() {
        let mut doc = SessionDocument::default();
        doc.general.last_name = "Smith".into();
        assert_eq!(doc.client_full_name(), "Smith");
    }
}
