use chrono::Utc;

use shopdesk_auth::account::{AGGREGATE_TYPE as ACCOUNT, normalize_phone};
use shopdesk_auth::{
    Account, AccountCommand, AccountRole, ChangeRole, DeactivateAccount, Principal, RegisterAccount, UpdateProfile,
};
use shopdesk_core::UserId;

use super::{Backoffice, account_stream};
use crate::command_dispatcher::DispatchError;
use crate::projections::AccountView;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountRegistration {
    pub phone: String,
    pub confirm_phone: String,
    pub name: String,
    pub address: String,
    pub gender: Option<String>,
    /// Only admins may register staff; everyone else becomes a customer.
    pub role: Option<AccountRole>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,
}

impl Backoffice {
    pub fn register_account(
        &self,
        registered_by: Option<&Principal>,
        user_id: UserId,
        registration: AccountRegistration,
    ) -> Result<AccountView, DispatchError> {
        let role = match registration.role {
            Some(role) if role != AccountRole::Customer => {
                if !registered_by.is_some_and(Principal::is_admin) {
                    return Err(DispatchError::forbidden("Only admins can register staff accounts."));
                }
                role
            }
            _ => AccountRole::Customer,
        };

        // Best effort: two concurrent registrations of one phone can both pass.
        let taken = normalize_phone(&registration.phone)
            .is_ok_and(|phone| self.projections.accounts.by_phone(&phone).is_some());
        if taken {
            return Err(DispatchError::validation("An account with this phone number already exists."));
        }

        self.dispatcher.dispatch(
            account_stream(user_id),
            ACCOUNT,
            AccountCommand::Register(RegisterAccount {
                user_id,
                phone: registration.phone,
                confirm_phone: registration.confirm_phone,
                name: registration.name,
                address: registration.address,
                gender: registration.gender,
                role,
                occurred_at: Utc::now(),
            }),
            |_| Account::empty(user_id),
        )?;

        tracing::info!(%user_id, role = ?role, "account registered");
        self.account(user_id)
    }

    /// Users edit their own profile; admins may edit anyone's.
    pub fn update_profile(&self, actor: &Principal, user_id: UserId, patch: ProfilePatch) -> Result<AccountView, DispatchError> {
        if actor.user_id != user_id && !actor.is_admin() {
            return Err(DispatchError::forbidden("You can only edit your own profile."));
        }
        self.account_command(
            user_id,
            AccountCommand::UpdateProfile(UpdateProfile {
                name: patch.name,
                address: patch.address,
                gender: patch.gender,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn change_role(&self, user_id: UserId, role: AccountRole) -> Result<AccountView, DispatchError> {
        let view = self.account_command(user_id, AccountCommand::ChangeRole(ChangeRole { role, occurred_at: Utc::now() }))?;
        tracing::info!(%user_id, role = ?role, "account role changed");
        Ok(view)
    }

    pub fn deactivate_account(&self, user_id: UserId) -> Result<AccountView, DispatchError> {
        let view = self.account_command(user_id, AccountCommand::Deactivate(DeactivateAccount { occurred_at: Utc::now() }))?;
        tracing::info!(%user_id, "account deactivated");
        Ok(view)
    }

    pub fn account(&self, user_id: UserId) -> Result<AccountView, DispatchError> {
        self.projections
            .accounts
            .get(&user_id)
            .ok_or_else(|| DispatchError::not_found("Account not found"))
    }

    pub fn accounts(&self) -> Vec<AccountView> {
        self.projections.accounts.list()
    }

    fn account_command(&self, user_id: UserId, command: AccountCommand) -> Result<AccountView, DispatchError> {
        let mut account = self.load_account(user_id)?;
        let mut uow = self.dispatcher.begin();
        uow.execute(account_stream(user_id), ACCOUNT, &mut account, &command)?;
        uow.commit()?;
        self.account(user_id)
    }
}
