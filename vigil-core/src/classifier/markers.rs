use once_cell::sync::Lazy;
use regex::Regex;
use vigil_model::ServiceGroup;

/// Call-pattern prefixes that reveal which client library a check uses.
pub const DEFAULT_MARKERS: &[(ServiceGroup, &[&str])] = &[
    (
        ServiceGroup::Mail,
        &[
            "Get-EXO",
            "Get-Mailbox",
            "Set-Mailbox",
            "Get-OrganizationConfig",
            "Get-TransportRule",
            "Get-TransportConfig",
            "Get-AdminAuditLogConfig",
            "Get-HostedContentFilterPolicy",
            "Get-AntiPhishPolicy",
            "Get-DkimSigningConfig",
            "Get-SafeLinksPolicy",
            "Get-SafeAttachmentPolicy",
            "Get-OwaMailboxPolicy",
            "Get-RemoteDomain",
            "outlook.office365.com",
        ],
    ),
    (
        ServiceGroup::Directory,
        &[
            "Get-Mg",
            "Update-Mg",
            "New-Mg",
            "Remove-Mg",
            "Invoke-MgGraphRequest",
            "graph.microsoft.com",
        ],
    ),
    (
        ServiceGroup::Compliance,
        &[
            "Get-DlpCompliancePolicy",
            "Get-DlpComplianceRule",
            "Get-RetentionCompliancePolicy",
            "Get-ProtectionAlert",
            "Get-Label",
            "Get-AutoSensitivityLabelPolicy",
            "ps.compliance.protection.outlook.com",
        ],
    ),
    (
        ServiceGroup::Platform,
        &[
            "Get-SPOTenant",
            "Get-SPOSite",
            "Get-PnP",
            "Get-CsTeams",
            "Get-CsTenant",
            "Get-CsExternalAccessPolicy",
            "Get-Team",
        ],
    ),
];

static DEFAULT_TABLE: Lazy<MarkerTable> = Lazy::new(|| {
    MarkerTable::from_entries(
        DEFAULT_MARKERS
            .iter()
            .map(|(group, markers)| (*group, markers.iter().copied())),
    )
});

/// One compiled alternation per service group.
#[derive(Debug, Clone)]
pub struct MarkerTable {
    patterns: Vec<(ServiceGroup, Regex)>,
}

impl MarkerTable {
    pub fn builtin() -> Self {
        DEFAULT_TABLE.clone()
    }

    /// Build a table from literal prefixes. Groups with no prefixes never
    /// match.
    pub fn from_entries<I, M, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ServiceGroup, M)>,
        M: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = entries
            .into_iter()
            .filter_map(|(group, markers)| {
                let alternation = markers
                    .into_iter()
                    .map(|marker| regex::escape(marker.as_ref()))
                    .collect::<Vec<_>>()
                    .join("|");
                if alternation.is_empty() {
                    return None;
                }
                // Literal, escaped alternation; compilation cannot fail.
                Regex::new(&format!(r"(?i)(?:^|[^\w-])(?:{alternation})"))
                    .ok()
                    .map(|regex| (group, regex))
            })
            .collect();
        Self { patterns }
    }

    /// Groups whose markers occur in `source`, in table order.
    pub fn matches(&self, source: &str) -> Vec<ServiceGroup> {
        let mut groups: Vec<ServiceGroup> = Vec::new();
        for (group, regex) in &self.patterns {
            if !groups.contains(group) && regex.is_match(source) {
                groups.push(*group);
            }
        }
        groups
    }
}

impl Default for MarkerTable {
    fn default() -> Self {
        Self::builtin()
    }
}
