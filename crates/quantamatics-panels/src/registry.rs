//! Static registry of the supported panels.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use quantamatics_core::{QmcError, Session};

use crate::providers::{FacteusSummaryPanel, PanelProvider, TenTenPanel};

/// Every panel this client knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedPanel {
    FacteusUSCPSummaryLatest,
    FacteusPulseBacktest,
    FacteusPulse,
    FacteusUSCPSummaryDemo,
    TenTenCreditFixedPanel,
    TenTenDebitFixedPanel,
    TenTenCombinedFixedPanel,
    TenTenCreditDenominatorPanel,
    TenTenDebitDenominatorPanel,
    TenTenCombinedDenominatorPanel,
}

impl SupportedPanel {
    pub const ALL: [Self; 10] = [
        Self::FacteusUSCPSummaryLatest,
        Self::FacteusPulseBacktest,
        Self::FacteusPulse,
        Self::FacteusUSCPSummaryDemo,
        Self::TenTenCreditFixedPanel,
        Self::TenTenDebitFixedPanel,
        Self::TenTenCombinedFixedPanel,
        Self::TenTenCreditDenominatorPanel,
        Self::TenTenDebitDenominatorPanel,
        Self::TenTenCombinedDenominatorPanel,
    ];

    pub const fn identifier(self) -> &'static str {
        match self {
            Self::FacteusUSCPSummaryLatest => "FacteusUSCPSummaryLatest",
            Self::FacteusPulseBacktest => "FacteusPulseBacktest",
            Self::FacteusPulse => "FacteusPulse",
            Self::FacteusUSCPSummaryDemo => "FacteusUSCPSummaryDemo",
            Self::TenTenCreditFixedPanel => "TenTenCreditFixedPanel",
            Self::TenTenDebitFixedPanel => "TenTenDebitFixedPanel",
            Self::TenTenCombinedFixedPanel => "TenTenCombinedFixedPanel",
            Self::TenTenCreditDenominatorPanel => "TenTenCreditDenominatorPanel",
            Self::TenTenDebitDenominatorPanel => "TenTenDebitDenominatorPanel",
            Self::TenTenCombinedDenominatorPanel => "TenTenCombinedDenominatorPanel",
        }
    }

    /// Server-side panel name.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::FacteusUSCPSummaryLatest => "USCP Summary v3.1",
            Self::FacteusPulseBacktest => "Pulse - Backtest",
            Self::FacteusPulse => "Pulse",
            Self::FacteusUSCPSummaryDemo => "USCP Summary Demo",
            Self::TenTenCreditFixedPanel => "1010data Credit Fixed Panel",
            Self::TenTenDebitFixedPanel => "1010data Debit Fixed Panel",
            Self::TenTenCombinedFixedPanel => "1010data Combined Fixed Panel",
            Self::TenTenCreditDenominatorPanel => "1010data Credit Denominator Panel",
            Self::TenTenDebitDenominatorPanel => "1010data Debit Denominator Panel",
            Self::TenTenCombinedDenominatorPanel => "1010data Combined Denominator Panel",
        }
    }

    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|panel| panel.display_name() == name)
    }

    /// Panels whose rows are summed to form this one; empty for panels
    /// that are loaded directly.
    pub const fn sources(self) -> &'static [Self] {
        match self {
            Self::TenTenCombinedFixedPanel => &[Self::TenTenCreditFixedPanel, Self::TenTenDebitFixedPanel],
            Self::TenTenCombinedDenominatorPanel => {
                &[Self::TenTenCreditDenominatorPanel, Self::TenTenDebitDenominatorPanel]
            }
            _ => &[],
        }
    }
}

impl Display for SupportedPanel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

type ProviderFuture = Pin<Box<dyn Future<Output = Result<Box<dyn PanelProvider>, QmcError>> + Send>>;
type PanelFactory = fn(Arc<Session>, SupportedPanel) -> ProviderFuture;

fn facteus_summary(session: Arc<Session>, panel: SupportedPanel) -> ProviderFuture {
    Box::pin(async move {
        let provider = FacteusSummaryPanel::init(session, panel.display_name()).await?;
        Ok(Box::new(provider) as Box<dyn PanelProvider>)
    })
}

fn tenten(session: Arc<Session>, panel: SupportedPanel) -> ProviderFuture {
    Box::pin(async move {
        let provider = match panel.sources() {
            [] => TenTenPanel::init(session, panel.display_name()).await?,
            sources => {
                let names = sources.iter().map(|source| source.display_name()).collect::<Vec<_>>();
                TenTenPanel::combined(session, panel.display_name(), &names).await?
            }
        };
        Ok(Box::new(provider) as Box<dyn PanelProvider>)
    })
}

/// Builds panel providers by display name.
#[derive(Debug, Clone)]
pub struct PanelRegistry {
    session: Arc<Session>,
    factories: HashMap<&'static str, (SupportedPanel, PanelFactory)>,
}

impl PanelRegistry {
    pub fn new(session: Arc<Session>) -> Self {
        let factories = SupportedPanel::ALL
            .into_iter()
            .map(|panel| {
                let factory: PanelFactory = match panel {
                    SupportedPanel::FacteusUSCPSummaryLatest
                    | SupportedPanel::FacteusPulseBacktest
                    | SupportedPanel::FacteusPulse
                    | SupportedPanel::FacteusUSCPSummaryDemo => facteus_summary,
                    _ => tenten,
                };
                (panel.display_name(), (panel, factory))
            })
            .collect();
        Self { session, factories }
    }

    pub fn supported_panels(&self) -> Vec<SupportedPanel> {
        let mut panels = self.factories.values().map(|(panel, _)| *panel).collect::<Vec<_>>();
        panels.sort_by_key(|panel| SupportedPanel::ALL.iter().position(|known| known == panel));
        panels
    }

    /// Looks the panel up on the server and returns its provider.
    pub async fn get_panel(&self, display_name: &str) -> Result<Box<dyn PanelProvider>, QmcError> {
        let (panel, factory) = self
            .factories
            .get(display_name)
            .copied()
            .ok_or_else(|| QmcError::data(format!("Unknown Panel Specification: {display_name}")))?;
        tracing::debug!(panel = %panel, identifier = panel.identifier(), "building panel provider");
        factory(Arc::clone(&self.session), panel).await
    }
}
