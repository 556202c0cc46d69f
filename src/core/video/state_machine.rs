use crate::core::config::CaptureConfig;

/// 二次确认状态：同一参考帧下连续出现的候选变化次数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationState {
    #[default]
    Idle,
    Verifying { confirmations: u32 },
}

impl VerificationState {
    pub fn new() -> Self {
        VerificationState::Idle
    }

    pub fn confirmations(&self) -> u32 {
        match self {
            VerificationState::Idle => 0,
            VerificationState::Verifying { confirmations } => *confirmations,
        }
    }

    /// `candidate` 为本帧是否判定为变化
    pub fn transition(
        &self,
        candidate: bool,
        config: &VerificationConfig,
    ) -> (VerificationState, VerificationAction) {
        if !candidate {
            return (VerificationState::Idle, VerificationAction::Hold);
        }

        if !config.enabled {
            return (VerificationState::Idle, VerificationAction::Confirm);
        }

        let confirmations = self.confirmations() + 1;
        if confirmations >= config.required {
            (VerificationState::Idle, VerificationAction::Confirm)
        } else {
            (
                VerificationState::Verifying { confirmations },
                VerificationAction::Pending {
                    confirmations,
                    required: config.required,
                },
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationAction {
    /// 无变化，计数归零
    Hold,
    /// 候选变化，等待更多确认
    Pending { confirmations: u32, required: u32 },
    /// 变化已确认
    Confirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationConfig {
    pub enabled: bool,
    pub required: u32,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required: 2,
        }
    }
}

impl VerificationConfig {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            enabled: config.enable_double_verification,
            required: config.verification_count.max(1),
        }
    }

    /// 不做二次确认，候选即确认
    pub fn immediate() -> Self {
        Self {
            enabled: false,
            required: 1,
        }
    }
}
