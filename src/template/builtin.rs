//! Templates compiled into the binary, used when no file overrides them.

pub const WELCOME: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Welcome</title></head>
<body style="font-family: Arial, sans-serif; color: #333333;">
  <h1>Welcome{{#if user.firstName}}, {{user.firstName}}{{/if}}!</h1>
  <p>Your account has been created{{#if user.email}} for <strong>{{user.email}}</strong>{{/if}}.</p>
  <p>We're glad to have you on board.</p>
</body>
</html>
"#;

pub const ORDER_CONFIRMATION: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Order confirmation</title></head>
<body style="font-family: Arial, sans-serif; color: #333333;">
  <h1>Thank you for your order</h1>
  <p>Hi {{#if user.firstName}}{{user.firstName}}{{else}}there{{/if}}, we received order <strong>#{{order.id}}</strong>{{#if order.createdAt}} placed on {{formatDate order.createdAt}}{{/if}}.</p>
  {{#if order.items}}
  <table cellpadding="6" style="border-collapse: collapse;">
    <thead><tr><th align="left">Item</th><th>Qty</th><th align="right">Price</th></tr></thead>
    <tbody>
      {{#each order.items}}
      <tr><td>{{name}}</td><td align="center">{{quantity}}</td><td align="right">{{formatCurrency price}}</td></tr>
      {{/each}}
    </tbody>
  </table>
  {{/if}}
  {{#if order.total}}<p>Total: <strong>{{formatCurrency order.total}}</strong></p>{{/if}}
</body>
</html>
"#;

pub const ORDER_SHIPPED: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Your order has shipped</title></head>
<body style="font-family: Arial, sans-serif; color: #333333;">
  <h1>Your order is on its way</h1>
  <p>Order <strong>#{{order.id}}</strong> has shipped{{#if carrier}} with {{carrier}}{{/if}}.</p>
  {{#if trackingNumber}}<p>Tracking number: <strong>{{trackingNumber}}</strong></p>{{/if}}
  {{#if estimatedDelivery}}<p>Estimated delivery: {{formatDate estimatedDelivery}}</p>{{/if}}
</body>
</html>
"#;

pub const ADMIN_ALERT: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{title}}</title></head>
<body style="font-family: Arial, sans-serif; color: #333333;">
  <h1 style="color: {{#if (eq severity "critical")}}#b00020{{else}}#c77700{{/if}};">{{title}}</h1>
  {{#if alertType}}<p><strong>Alert:</strong> {{alertType}}</p>{{/if}}
  {{#if message}}<p>{{message}}</p>{{/if}}
  {{#if details}}
  <ul>
    {{#each details}}<li><strong>{{@key}}</strong>: {{this}}</li>{{/each}}
  </ul>
  {{/if}}
  {{#if timestamp}}<p style="color: #777777;">{{formatDate timestamp "%Y-%m-%d %H:%M:%S UTC"}}</p>{{/if}}
</body>
</html>
"#;

/// Generic body for names without a template: echoes the data.
pub const PASSTHROUGH: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Notification</title></head>
<body style="font-family: Arial, sans-serif; color: #333333;">
  <h1>{{#if title}}{{title}}{{else}}Notification{{/if}}</h1>
  {{#if message}}<p>{{message}}</p>{{/if}}
  <table cellpadding="4">
    {{#each this}}<tr><td><strong>{{@key}}</strong></td><td>{{this}}</td></tr>{{/each}}
  </table>
</body>
</html>
"#;

/// Source of a built-in template by name.
pub fn source(name: &str) -> Option<&'static str> {
    match name {
        "welcome" => Some(WELCOME),
        "order-confirmation" => Some(ORDER_CONFIRMATION),
        "order-shipped" => Some(ORDER_SHIPPED),
        "admin-alert" => Some(ADMIN_ALERT),
        _ => None,
    }
}
