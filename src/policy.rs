//! Target-layer policy
//!
//! Every write lands in exactly one layer. The choice depends on the
//! option's flags, whether the edit came from the user or from code, and
//! whether the active graphics preset is "custom" (in which case derived
//! quality tuning must not silently clobber the user's own values).

use crate::layer::{LayerKey, CONFIG_LAYER, DERIVED_LAYER, QUALITY_LAYER, USER_LAYER};
use crate::option::OptionFlags;

/// Where a write originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditContext {
    /// A user-driven edit (settings UI, console).
    User,
    /// A code-driven or derived edit (preset application, heuristics).
    Derived,
}

/// Decide which layer a write goes to. First match wins:
///
/// 1. NoSave with no explicit layer: always the volatile derived layer.
/// 2. An explicit layer (tests, migration) is used verbatim, and is the
///    only way to bypass rule 1.
/// 3. User edit, not a UserSetting: the main config layer.
/// 4. User edit, UserSetting: the user-settings layer.
/// 5. Derived edit, UserSetting, preset is Custom: the user-settings
///    layer, so custom tuning stays visible and editable.
/// 6. Derived edit, UserSetting, preset not Custom: the quality layer.
/// 7. Derived edit, not a UserSetting: the derived layer.
pub fn target_layer(
    flags: OptionFlags,
    context: EditContext,
    explicit: Option<&LayerKey>,
    preset_is_custom: bool,
) -> LayerKey {
    if flags.no_save && explicit.is_none() {
        return DERIVED_LAYER.clone();
    }
    if let Some(layer) = explicit {
        return layer.clone();
    }
    match (context, flags.user_setting) {
        (EditContext::User, false) => CONFIG_LAYER.clone(),
        (EditContext::User, true) => USER_LAYER.clone(),
        (EditContext::Derived, true) if preset_is_custom => USER_LAYER.clone(),
        (EditContext::Derived, true) => QUALITY_LAYER.clone(),
        (EditContext::Derived, false) => DERIVED_LAYER.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::ENVIRONMENT_LAYER;

    fn flags(no_save: bool, user_setting: bool) -> OptionFlags {
        OptionFlags {
            no_save,
            no_reset: false,
            user_setting,
        }
    }

    #[test]
    fn test_no_save_always_derived() {
        let f = flags(true, true);
        assert_eq!(target_layer(f, EditContext::User, None, true), *DERIVED_LAYER);
        assert_eq!(target_layer(f, EditContext::Derived, None, false), *DERIVED_LAYER);
    }

    #[test]
    fn test_explicit_layer_bypasses_no_save() {
        let f = flags(true, false);
        let target = target_layer(f, EditContext::Derived, Some(&ENVIRONMENT_LAYER), false);
        assert_eq!(target, *ENVIRONMENT_LAYER);
    }

    #[test]
    fn test_user_edits_split_on_user_setting() {
        assert_eq!(
            target_layer(flags(false, false), EditContext::User, None, false),
            *CONFIG_LAYER
        );
        assert_eq!(
            target_layer(flags(false, true), EditContext::User, None, false),
            *USER_LAYER
        );
    }

    #[test]
    fn test_derived_user_setting_follows_preset() {
        let f = flags(false, true);
        assert_eq!(target_layer(f, EditContext::Derived, None, true), *USER_LAYER);
        assert_eq!(target_layer(f, EditContext::Derived, None, false), *QUALITY_LAYER);
    }

    #[test]
    fn test_derived_plain_goes_to_derived() {
        let f = flags(false, false);
        assert_eq!(target_layer(f, EditContext::Derived, None, true), *DERIVED_LAYER);
    }
}
